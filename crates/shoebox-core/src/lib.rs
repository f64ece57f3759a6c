pub mod commit;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod hasher;
pub mod library;
pub mod matching;
pub mod metadata;
pub mod naming;
pub mod progress;
pub mod resolution;
pub mod scanner;
pub mod search;
pub mod similarity;
pub mod staging;
pub mod storage;

pub use commit::{CommitOptions, CommitReport};
pub use config::{AppConfig, LibraryConfig};
pub use error::{Error, Result};
pub use library::{IntegrityIssue, Library, LibraryStats};
pub use matching::MatchReport;
pub use metadata::{CommandExtractor, ExtractedMetadata, FilesystemExtractor, MetadataExtractor};
pub use progress::{CancellationToken, ProgressReporter, SilentReporter};
pub use search::{
    run_search, spawn_search, Granularity, SearchEvent, SearchHandle, SearchOutcome, SearchPlan,
};
pub use similarity::{ContentSimilarity, SimilarGroup, SimilarityEngine, SimilarityReport};
pub use staging::{StagingOptions, StagingReport};
pub use storage::models::{
    DuplicateCluster, EntryState, ImportBatch, LibraryEntry, MatchType, ReplacedEntry, StagedFile,
};
