use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Rejected input: a bad library root, a missing catalog, or an argument that names nothing.
    #[error("Invalid library: {0}")]
    Validation(String),

    /// A merge would chain a duplicate onto an entry that is itself replaced.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// More than one row where the catalog guarantees uniqueness.
    #[error("Corrupt database: {0}")]
    CorruptDatabase(String),

    #[error("All names for timestamp '{0}' are taken")]
    NameExhaustion(String),

    /// Identical content hash and size but differing bytes. Never resolved automatically.
    #[error("Hash matches but bytes differ: '{candidate}' vs '{existing}'")]
    HashBinaryMismatch {
        candidate: PathBuf,
        existing: PathBuf,
    },

    #[error("No library entry with key {0}")]
    UnknownEntry(i64),

    #[error("No import batch with key {0}")]
    UnknownBatch(i64),

    #[error("Duplicate registry holds {0} unresolved clusters; clear it first")]
    RegistryNotEmpty(i64),

    #[error("Metadata extraction failed for '{path}': {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
