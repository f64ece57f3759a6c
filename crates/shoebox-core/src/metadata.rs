use crate::error::{Error, Result};
use crate::hasher;
use crate::storage::models::{file_size_of, SIZE_FIELD};
use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::trace;

/// Naming tags starting with this marker come from filesystem timestamps only.
pub const FILESYSTEM_TAG_PREFIX: &str = "File:";

/// Everything the engine needs to know about one candidate file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedMetadata {
    /// Arbitrary tag map; must contain [`SIZE_FIELD`].
    pub metadata: Value,
    #[serde(default)]
    pub provenance_metadata: Option<Value>,
    pub content_hash: String,
    pub naming_tag: String,
    pub canonical_timestamp: NaiveDateTime,
    #[serde(default)]
    pub low_confidence: bool,
}

impl ExtractedMetadata {
    fn validated(mut self, path: &Path) -> Result<Self> {
        if file_size_of(&self.metadata).is_none() {
            return Err(Error::Metadata {
                path: path.to_path_buf(),
                reason: format!("metadata has no '{}' field", SIZE_FIELD),
            });
        }
        if self.content_hash.is_empty() {
            return Err(Error::Metadata {
                path: path.to_path_buf(),
                reason: "empty content hash".to_string(),
            });
        }
        self.low_confidence |= is_filesystem_tag(&self.naming_tag);
        Ok(self)
    }
}

pub fn is_filesystem_tag(naming_tag: &str) -> bool {
    naming_tag.starts_with(FILESYSTEM_TAG_PREFIX)
}

/// Turns a file path into an [`ExtractedMetadata`] record.
pub trait MetadataExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata>;
}

/// Size, BLAKE3 hash and modification time straight from the filesystem.
///
/// Every record it produces is low-confidence.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemExtractor;

impl MetadataExtractor for FilesystemExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        let meta = fs::metadata(path)?;
        let modified: DateTime<Local> = meta.modified()?.into();
        let local = modified.naive_local();
        let timestamp = local.with_nanosecond(0).unwrap_or(local);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tags = Map::new();
        tags.insert("File:FileName".to_string(), Value::from(file_name));
        tags.insert(SIZE_FIELD.to_string(), Value::from(meta.len()));
        tags.insert(
            "File:FileModifyDate".to_string(),
            Value::from(timestamp.format("%Y:%m:%d %H:%M:%S").to_string()),
        );

        let extracted = ExtractedMetadata {
            metadata: Value::Object(tags),
            provenance_metadata: None,
            content_hash: hasher::content_hash(path)?,
            naming_tag: format!("{}FileModifyDate", FILESYSTEM_TAG_PREFIX),
            canonical_timestamp: timestamp,
            low_confidence: true,
        };
        extracted.validated(path)
    }
}

/// Runs an external program once per file and reads one JSON record from its stdout.
///
/// The file path is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full argv (`[program, args...]`).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl MetadataExtractor for CommandExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        trace!("Running {} for {}", self.program, path.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(Error::Metadata {
                path: path.to_path_buf(),
                reason: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let extracted: ExtractedMetadata =
            serde_json::from_slice(&output.stdout).map_err(|e| Error::Metadata {
                path: path.to_path_buf(),
                reason: format!("unreadable output from {}: {}", self.program, e),
            })?;
        extracted.validated(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_filesystem_extractor_is_low_confidence() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("IMG_0001.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();

        let extracted = FilesystemExtractor.extract(&path).unwrap();
        assert!(extracted.low_confidence);
        assert!(is_filesystem_tag(&extracted.naming_tag));
        assert_eq!(file_size_of(&extracted.metadata), Some(17));
        assert_eq!(extracted.content_hash, hasher::content_hash(&path).unwrap());
        assert_eq!(extracted.canonical_timestamp.nanosecond(), 0);
    }

    #[test]
    fn test_record_deserializes_and_derives_confidence() {
        let raw = r#"{
            "metadata": {"File:FileSize": 10, "EXIF:Model": "X100"},
            "provenance_metadata": {"XMP:Rating": 5},
            "content_hash": "abc",
            "naming_tag": "File:FileCreateDate",
            "canonical_timestamp": "2024-01-01T10:00:00"
        }"#;
        let parsed: ExtractedMetadata = serde_json::from_str(raw).unwrap();
        let validated = parsed.validated(Path::new("x.jpg")).unwrap();
        assert!(validated.low_confidence);
        assert!(validated.provenance_metadata.is_some());
    }

    #[test]
    fn test_record_without_size_is_rejected() {
        let record = ExtractedMetadata {
            metadata: json!({"EXIF:Model": "X100"}),
            provenance_metadata: None,
            content_hash: "abc".to_string(),
            naming_tag: "EXIF:DateTimeOriginal".to_string(),
            canonical_timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            low_confidence: false,
        };
        assert!(matches!(
            record.validated(Path::new("x.jpg")),
            Err(Error::Metadata { .. })
        ));
    }
}
