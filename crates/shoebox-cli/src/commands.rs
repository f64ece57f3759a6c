use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "shoebox")]
#[command(about = "A content-addressed photo and video library", long_about = None)]
pub struct Cli {
    /// Library root; overrides `library_root` from the configuration
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty library at the library root
    Init,
    /// Register an import folder and extract metadata for its files
    Stage {
        folder: PathBuf,
        /// Re-extract metadata for files that already have it
        #[arg(long)]
        recompute: bool,
        /// Only admit these extensions (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },
    /// Classify a staged batch against the library
    Match { batch: i64 },
    /// Copy accepted rows of a batch into the library
    Commit {
        batch: i64,
        #[command(flatten)]
        commit: CommitArgs,
    },
    /// Stage, match and commit a folder in one go
    Import {
        folder: PathBuf,
        #[command(flatten)]
        commit: CommitArgs,
    },
    /// List open import batches
    Batches,
    /// Show the staged rows of a batch
    Staged { batch: i64 },
    /// Drop a batch without importing anything more
    Revert { batch: i64 },
    /// Drop a batch after its rows have been committed
    Finish { batch: i64 },
    /// Search the library for duplicates and register the clusters
    FindDuplicates {
        /// Group by exact content hash instead of running the similarity engine
        #[arg(long, conflicts_with = "granularity")]
        hash: bool,
        /// library, year, month or day
        #[arg(long, default_value = "library")]
        granularity: String,
        /// Run the search on a worker thread; entering `q` cancels it
        #[arg(long)]
        background: bool,
    },
    /// List pending duplicate clusters
    Duplicates,
    /// Empty the duplicate registry
    ClearDuplicates,
    /// Merge every member of a cluster into one successor
    Resolve {
        cluster: i64,
        successor: i64,
        /// Delete the merged files instead of moving them to the trash
        #[arg(long)]
        delete: bool,
    },
    /// Merge one entry into another
    Merge {
        successor: i64,
        duplicate: i64,
        #[arg(long)]
        delete: bool,
    },
    /// Move an entry's file to the trash
    Trash { key: i64 },
    /// Bring a trashed entry back
    Restore { key: i64 },
    /// Print the on-disk path of an entry
    Path { key: i64 },
    /// Give an entry a new timestamp, e.g. "2024-01-01 10:00:00"
    Rename {
        key: i64,
        timestamp: String,
        #[arg(long, default_value = "Manual")]
        tag: String,
    },
    /// Free a name in the ledger
    ReleaseName { name: String },
    /// Show library counts
    Stats,
    /// Compare catalog flags against the filesystem
    Check,
    /// Repoint replaced entries at the live end of their chains
    FlattenChains,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct CommitArgs {
    /// Match types to import, by label or code (default: No_Match)
    #[arg(long = "accept", value_delimiter = ',')]
    pub accept: Vec<String>,
    /// Do not copy provenance metadata from matched entries
    #[arg(long)]
    pub no_provenance: bool,
}
