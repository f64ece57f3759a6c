use chrono::NaiveDateTime;
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Metadata field holding the file size in bytes. Every metadata blob carries it.
pub const SIZE_FIELD: &str = "File:FileSize";

/// Outcome of the matching cascade for one staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchType {
    NoMatch = 0,
    BinaryMatchImages = 1,
    HashMatchTrash = 2,
    BinaryMatchTrash = 3,
    HashMatchReplaced = 4,
    BinaryMatchReplaced = 5,
}

impl MatchType {
    pub const ALL: [MatchType; 6] = [
        MatchType::NoMatch,
        MatchType::BinaryMatchImages,
        MatchType::HashMatchTrash,
        MatchType::BinaryMatchTrash,
        MatchType::HashMatchReplaced,
        MatchType::BinaryMatchReplaced,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchType::NoMatch => "No_Match",
            MatchType::BinaryMatchImages => "Binary_Match_Images",
            MatchType::HashMatchTrash => "Hash_Match_Trash",
            MatchType::BinaryMatchTrash => "Binary_Match_Trash",
            MatchType::HashMatchReplaced => "Hash_Match_Replaced",
            MatchType::BinaryMatchReplaced => "Binary_Match_Replaced",
        }
    }

    /// Accepts either the label (`Hash_Match_Trash`) or the numeric code (`2`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|m| m.label().eq_ignore_ascii_case(s))
    }

    /// The matched key of this match type refers to a `replaced` row rather than `images`.
    pub fn points_at_replaced(self) -> bool {
        matches!(
            self,
            MatchType::HashMatchReplaced | MatchType::BinaryMatchReplaced
        )
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a LibraryEntry's provenance metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvenanceStatus {
    Absent = 0,
    CopiedFromMatch = 1,
    Original = 2,
}

impl ProvenanceStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ProvenanceStatus::CopiedFromMatch,
            2 => ProvenanceStatus::Original,
            _ => ProvenanceStatus::Absent,
        }
    }
}

/// A managed file's live catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub key: i64,
    pub org_fname: String,
    pub org_fpath: String,
    pub metadata: Value,
    pub provenance_metadata: Option<Value>,
    pub naming_tag: String,
    pub content_hash: String,
    pub new_name: String,
    pub datetime: NaiveDateTime,
    pub present: bool,
    pub trashed: bool,
    pub verify: bool,
    pub provenance_status: ProvenanceStatus,
}

impl LibraryEntry {
    pub fn file_size(&self) -> Option<u64> {
        file_size_of(&self.metadata)
    }

    /// Extension of the allocated name, including the leading dot (empty if none).
    pub fn extension(&self) -> String {
        extension_with_dot(Path::new(&self.new_name))
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_flags(self.present, self.trashed)
    }
}

/// The four combinations of the `present` / `trashed` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    SoftDeleted,
    HardDeleted,
    Anomalous,
}

impl EntryState {
    pub fn from_flags(present: bool, trashed: bool) -> Self {
        match (present, trashed) {
            (true, false) => EntryState::Active,
            (true, true) => EntryState::SoftDeleted,
            (false, true) => EntryState::HardDeleted,
            (false, false) => EntryState::Anomalous,
        }
    }
}

/// Frozen snapshot of a merged-away LibraryEntry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacedEntry {
    pub entry: LibraryEntry,
    pub successor: i64,
    pub former_name: String,
}

#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub key: i64,
    pub root_path: String,
    pub table_name: String,
    pub created_at: String,
}

/// One candidate file in an import batch's staging table.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub key: i64,
    pub org_fname: String,
    pub org_fpath: String,
    pub metadata: Option<Value>,
    pub provenance_metadata: Option<Value>,
    pub content_hash: Option<String>,
    pub imported: bool,
    pub allowed: bool,
    pub match_type: Option<MatchType>,
    pub message: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub naming_tag: Option<String>,
    pub matched_key: Option<i64>,
    pub import_key: Option<i64>,
}

impl StagedFile {
    pub fn source_path(&self) -> std::path::PathBuf {
        Path::new(&self.org_fpath).join(&self.org_fname)
    }

    pub fn file_size(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(file_size_of)
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some() && self.content_hash.is_some() && self.datetime.is_some()
    }
}

/// A group of library keys believed to be duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCluster {
    pub key: i64,
    pub match_type: String,
    pub matched_keys: Vec<i64>,
}

pub fn file_size_of(metadata: &Value) -> Option<u64> {
    match metadata.get(SIZE_FIELD)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}
