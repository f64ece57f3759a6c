use crate::error::Result;
use crate::hasher::xxhash;
use crate::scanner;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One group found by a similarity engine: a file to keep and its look-alikes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarGroup {
    pub reference_path: PathBuf,
    pub duplicate_paths: Vec<PathBuf>,
}

impl SimilarGroup {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.reference_path).chain(self.duplicate_paths.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimilarityReport {
    pub clusters: BTreeMap<u64, SimilarGroup>,
    /// Files the engine judged to be lower-quality copies of something else.
    pub lower_quality: Vec<PathBuf>,
}

/// A clustering service run over one directory at a time.
pub trait SimilarityEngine: Send + Sync {
    fn search(&self, dir: &Path, ignore: &[PathBuf]) -> Result<SimilarityReport>;

    /// Private state file the engine keeps inside `dir`; removed before every run.
    fn scratch_file(&self, _dir: &Path) -> Option<PathBuf> {
        None
    }
}

/// Groups byte-identical files using size, then a 1 KiB XxHash64 prefix, then a full XxHash64.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentSimilarity;

impl SimilarityEngine for ContentSimilarity {
    fn search(&self, dir: &Path, ignore: &[PathBuf]) -> Result<SimilarityReport> {
        let files = scanner::list_files(dir, &[], ignore)?;
        let size_map = scanner::group_by_size(&files);
        let hash_map = xxhash::build_content_hash_map(size_map);

        let mut report = SimilarityReport::default();
        for (hash, mut paths) in hash_map {
            paths.sort();
            let mut paths = paths.into_iter();
            let Some(reference_path) = paths.next() else {
                continue;
            };
            report.clusters.insert(
                hash,
                SimilarGroup {
                    reference_path,
                    duplicate_paths: paths.collect(),
                },
            );
        }
        debug!(
            "{} identical groups among {} files in {}",
            report.clusters.len(),
            files.len(),
            dir.display()
        );
        Ok(report)
    }
}
