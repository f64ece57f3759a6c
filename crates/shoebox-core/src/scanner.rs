use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;
use walkdir::WalkDir;

pub fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Recursively list regular files under `root`, sorted by path.
///
/// Symlinks are not followed. Anything matching an ignore pattern, or lying under one of the
/// `skip` paths, is left out. Unreadable directories are logged and skipped.
pub fn list_files(
    root: &Path,
    ignore_patterns: &[Pattern],
    skip: &[PathBuf],
) -> walkdir::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let path = entry.path();
            !skip.iter().any(|s| path.starts_with(s))
                && !ignore_patterns.iter().any(|p| p.matches_path(path))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::PermissionDenied) {
                    error!("Access denied: {}", err);
                    continue;
                }
                return Err(err);
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Group files by size. Skips 0-byte files and files whose metadata can't be read.
pub fn group_by_size(files: &[PathBuf]) -> DashMap<u64, Vec<PathBuf>> {
    let map: DashMap<u64, Vec<PathBuf>> = DashMap::new();
    files.par_iter().for_each(|path| match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => map.entry(meta.len()).or_default().push(path.clone()),
        Ok(_) => {}
        Err(e) => error!("Error getting metadata for {}: {}", path.display(), e),
    });
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_files_honours_skip_and_ignore() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("keep/nested")).unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::write(root.join("keep/a.jpg"), "a").unwrap();
        fs::write(root.join("keep/nested/b.jpg"), "b").unwrap();
        fs::write(root.join("keep/Thumbs.db"), "t").unwrap();
        fs::write(root.join(".trash/c.jpg"), "c").unwrap();

        let patterns = compile_patterns(&["**/Thumbs.db".to_string()]);
        let files = list_files(root, &patterns, &[root.join(".trash")]).unwrap();
        assert_eq!(
            files,
            vec![root.join("keep/a.jpg"), root.join("keep/nested/b.jpg")]
        );
    }

    #[test]
    fn test_group_by_size_skips_empty_files() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let empty = tmp.path().join("empty");
        fs::write(&a, "1234").unwrap();
        fs::write(&b, "abcd").unwrap();
        fs::write(&empty, "").unwrap();

        let map = group_by_size(&[a, b, empty]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&4).unwrap().len(), 2);
    }
}
