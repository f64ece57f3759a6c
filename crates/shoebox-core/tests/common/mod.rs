#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use shoebox_core::hasher::content_hash;
use shoebox_core::{
    CancellationToken, CommitOptions, Error, ExtractedMetadata, Library, LibraryConfig,
    MetadataExtractor, Result, SilentReporter, StagingOptions,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{tempdir, TempDir};

pub fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

/// Deterministic extractor keyed on file name. Real size and BLAKE3 hash unless overridden.
pub struct TestExtractor {
    default_timestamp: NaiveDateTime,
    timestamps: HashMap<String, NaiveDateTime>,
    provenance: HashMap<String, Value>,
    hashes: HashMap<String, String>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl TestExtractor {
    pub fn new() -> Self {
        Self {
            default_timestamp: ts(2024, 1, 1, 10, 0, 0),
            timestamps: HashMap::new(),
            provenance: HashMap::new(),
            hashes: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn timestamp(mut self, name: &str, timestamp: NaiveDateTime) -> Self {
        self.timestamps.insert(name.to_string(), timestamp);
        self
    }

    pub fn provenance(mut self, name: &str, value: Value) -> Self {
        self.provenance.insert(name.to_string(), value);
        self
    }

    pub fn hash(mut self, name: &str, hash: &str) -> Self {
        self.hashes.insert(name.to_string(), hash.to_string());
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataExtractor for TestExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if self.failing.contains(&name) {
            return Err(Error::Metadata {
                path: path.to_path_buf(),
                reason: "unreadable test file".to_string(),
            });
        }

        let size = fs::metadata(path)?.len();
        let content_hash = match self.hashes.get(&name) {
            Some(hash) => hash.clone(),
            None => content_hash(path)?,
        };
        Ok(ExtractedMetadata {
            metadata: json!({"File:FileSize": size, "File:FileName": name}),
            provenance_metadata: self.provenance.get(&name).cloned(),
            content_hash,
            naming_tag: "EXIF:DateTimeOriginal".to_string(),
            canonical_timestamp: self
                .timestamps
                .get(&name)
                .copied()
                .unwrap_or(self.default_timestamp),
            low_confidence: false,
        })
    }
}

/// A fresh library under `<tmp>/library` plus a scratch area for import folders.
pub struct Fixture {
    _tmp: TempDir,
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub library: Library,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(LibraryConfig::default())
    }

    pub fn with_config(config: LibraryConfig) -> Self {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("library");
        let inbox = tmp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let library = Library::create(&root, config).unwrap();
        Self {
            _tmp: tmp,
            root,
            inbox,
            library,
        }
    }

    /// Create `inbox/<folder>` holding the given files.
    pub fn folder(&self, folder: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dir = self.inbox.join(folder);
        fs::create_dir_all(&dir).unwrap();
        for (name, bytes) in files {
            fs::write(dir.join(name), bytes).unwrap();
        }
        dir
    }

    /// Stage, match and commit a folder; returns the new entry keys in file-name order.
    pub fn import(
        &self,
        folder: &Path,
        extractor: &TestExtractor,
        options: &CommitOptions,
    ) -> Vec<i64> {
        let batch = self.library.create_import_batch(folder).unwrap();
        self.library
            .prepare_import(
                &batch,
                &StagingOptions::default(),
                extractor,
                &SilentReporter,
                &CancellationToken::new(),
            )
            .unwrap();
        self.library.match_batch(&batch, &SilentReporter).unwrap();
        self.library
            .import_folder(&batch, options, &SilentReporter)
            .unwrap();
        let keys = self
            .library
            .staged_files(&batch)
            .unwrap()
            .into_iter()
            .filter_map(|row| row.import_key)
            .collect();
        self.library.finish_import_batch(&batch).unwrap();
        keys
    }

    /// Import every file of a folder regardless of what it matches.
    pub fn import_all(&self, folder: &Path, extractor: &TestExtractor) -> Vec<i64> {
        let options = CommitOptions::default().accept(shoebox_core::MatchType::ALL);
        self.import(folder, extractor, &options)
    }
}
