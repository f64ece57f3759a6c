use dashmap::DashMap;
use rayon::prelude::*;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use twox_hash::XxHash64;

const PARTIAL_HASH_LENGTH: usize = 1024; // 1KB
const READ_CHUNK: usize = 64 * 1024;

/// Two-tier hashing strategy:
/// 1. Partial hash (first 1KB via XxHash64) to quickly eliminate non-matches
/// 2. Full content hash only on partial-hash collisions
///
/// Takes a map keyed on file size (each value is a Vec of paths with that size)
/// and returns a map of content_hash → Vec<PathBuf> for confirmed duplicates only.
pub fn build_content_hash_map(
    size_to_file_map: DashMap<u64, Vec<PathBuf>>,
) -> DashMap<u64, Vec<PathBuf>> {
    let confirmed_duplicates: DashMap<u64, Vec<PathBuf>> = DashMap::new();

    let size_to_file_vec: Vec<_> = size_to_file_map
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect();

    size_to_file_vec.par_iter().for_each(|(_, files)| {
        let partial_hash_to_file_map: DashMap<u64, Vec<PathBuf>> = DashMap::new();
        let full_hash_to_file_map: DashMap<u64, Vec<PathBuf>> = DashMap::new();

        // First pass: partial hash to eliminate non-dupes quickly
        files
            .par_iter()
            .for_each(|file| insert_hash(file, read_partial_hash, &partial_hash_to_file_map));

        // Second pass: full hash only on partial-hash collisions (>1 file)
        partial_hash_to_file_map
            .iter()
            .filter(|entry| entry.value().len() > 1)
            .for_each(|entry| {
                entry
                    .value()
                    .par_iter()
                    .for_each(|file| insert_hash(file, read_full_hash, &full_hash_to_file_map));
            });

        for entry in full_hash_to_file_map.iter() {
            if entry.value().len() > 1 {
                confirmed_duplicates
                    .entry(*entry.key())
                    .or_default()
                    .extend_from_slice(entry.value());
            }
        }
    });

    confirmed_duplicates
}

fn insert_hash(
    file: &Path,
    hash_fn: fn(&Path) -> io::Result<u64>,
    map: &DashMap<u64, Vec<PathBuf>>,
) {
    match hash_fn(file) {
        Ok(hash) => map.entry(hash).or_default().push(file.to_path_buf()),
        Err(e) => tracing::error!("Error processing file '{}': {}", file.display(), e),
    }
}

fn read_partial_hash(file: &Path) -> io::Result<u64> {
    let mut f = File::open(file)?;
    let mut buffer = vec![0; PARTIAL_HASH_LENGTH];
    let bytes_read = f.read(&mut buffer)?;
    buffer.truncate(bytes_read);
    Ok(hash_data(&buffer))
}

fn read_full_hash(file: &Path) -> io::Result<u64> {
    let mut f = File::open(file)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0; READ_CHUNK];
    loop {
        let n = f.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write(&buffer[..n]);
    }
    Ok(hasher.finish())
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}
