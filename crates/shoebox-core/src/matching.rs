use crate::error::{Error, Result};
use crate::hasher;
use crate::library::Library;
use crate::progress::ProgressReporter;
use crate::storage::models::{ImportBatch, LibraryEntry, MatchType, StagedFile};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub counts: BTreeMap<MatchType, usize>,
    /// Rows left unclassified because of a per-row failure.
    pub failed: usize,
}

impl MatchReport {
    pub fn count(&self, match_type: MatchType) -> usize {
        self.counts.get(&match_type).copied().unwrap_or(0)
    }
}

/// Result of running one staged file through the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub match_type: MatchType,
    pub matched_key: Option<i64>,
    pub message: String,
}

impl Classification {
    fn no_match() -> Self {
        Self {
            match_type: MatchType::NoMatch,
            matched_key: None,
            message: "No match in library".to_string(),
        }
    }

    fn hit(match_type: MatchType, key: i64, message: String) -> Self {
        Self {
            match_type,
            matched_key: Some(key),
            message,
        }
    }
}

/// The fields of a staged row the cascade needs, all guaranteed present.
struct Candidate<'a> {
    path: PathBuf,
    content_hash: &'a str,
    size: u64,
    datetime: NaiveDateTime,
}

impl<'a> Candidate<'a> {
    fn from_row(row: &'a StagedFile) -> Option<Self> {
        Some(Self {
            path: row.source_path(),
            content_hash: row.content_hash.as_deref()?,
            size: row.file_size()?,
            datetime: row.datetime?,
        })
    }

    fn same_content_key(&self, entry: &LibraryEntry) -> bool {
        entry.content_hash == self.content_hash && entry.file_size() == Some(self.size)
    }
}

impl Library {
    /// Classify every allowed, not yet imported row of a batch against the library.
    ///
    /// Only the staging table is written. A row that cannot be read gets a message and no
    /// match type; a hash match with differing bytes aborts the whole pass.
    pub fn match_batch(
        &self,
        batch: &ImportBatch,
        reporter: &dyn ProgressReporter,
    ) -> Result<MatchReport> {
        let start = Instant::now();
        let table = batch.table_name.as_str();
        let rows: Vec<StagedFile> = self
            .database()
            .staged_files(table)?
            .into_iter()
            .filter(|row| row.allowed && !row.imported)
            .collect();

        let mut report = MatchReport::default();
        reporter.on_match_start(rows.len());

        let tx = self.database().connection().unchecked_transaction()?;
        for (done, row) in rows.iter().enumerate() {
            let Some(candidate) = Candidate::from_row(row) else {
                debug!("Row {} of batch {} has no metadata", row.key, batch.key);
                self.database().set_staged_message(
                    table,
                    row.key,
                    "No metadata; run staging first",
                )?;
                report.failed += 1;
                continue;
            };

            match self.classify(&candidate) {
                Ok(found) => {
                    debug!(
                        "{} -> {} ({})",
                        candidate.path.display(),
                        found.match_type,
                        found.message
                    );
                    self.database().set_staged_match(
                        table,
                        row.key,
                        found.match_type,
                        found.matched_key,
                        &found.message,
                    )?;
                    *report.counts.entry(found.match_type).or_default() += 1;
                }
                Err(e @ Error::HashBinaryMismatch { .. }) => {
                    error!("Aborting match of batch {}: {}", batch.key, e);
                    return Err(e);
                }
                Err(Error::Io(e)) => {
                    error!("Cannot match {}: {}", candidate.path.display(), e);
                    self.database().set_staged_message(
                        table,
                        row.key,
                        &format!("Matching failed: {}", e),
                    )?;
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
            reporter.on_match_progress(done + 1);
        }
        tx.commit()?;

        let duration = start.elapsed().as_secs_f64();
        reporter.on_match_complete(duration);
        info!(
            "Matched {} rows of batch {} in {:.2}s ({} failed)",
            rows.len(),
            batch.key,
            duration,
            report.failed
        );
        Ok(report)
    }

    /// Run the cascade, first hit wins.
    fn classify(&self, candidate: &Candidate<'_>) -> Result<Classification> {
        if let Some(found) = self.match_same_datetime(candidate)? {
            return Ok(found);
        }

        let by_hash: Vec<LibraryEntry> = self
            .database()
            .entries_by_hash(candidate.content_hash)?
            .into_iter()
            .filter(|entry| candidate.same_content_key(entry))
            .collect();

        if let Some(found) = self.match_live_by_hash(candidate, &by_hash)? {
            return Ok(found);
        }
        if let Some(found) = self.match_trashed_by_hash(candidate, &by_hash)? {
            return Ok(found);
        }
        if let Some(found) = self.match_replaced_by_hash(candidate)? {
            return Ok(found);
        }
        Ok(Classification::no_match())
    }

    /// Same canonical timestamp and byte-identical file.
    fn match_same_datetime(&self, candidate: &Candidate<'_>) -> Result<Option<Classification>> {
        for entry in self.database().entries_by_datetime(&candidate.datetime)? {
            if entry.trashed || entry.file_size() != Some(candidate.size) {
                continue;
            }
            let Some(existing) = self.locate(&entry) else {
                continue;
            };
            if hasher::files_identical(&candidate.path, &existing)? {
                return Ok(Some(Classification::hit(
                    MatchType::BinaryMatchImages,
                    entry.key,
                    format!("Identical to {} (same timestamp)", entry.new_name),
                )));
            }
        }
        Ok(None)
    }

    fn match_live_by_hash(
        &self,
        candidate: &Candidate<'_>,
        by_hash: &[LibraryEntry],
    ) -> Result<Option<Classification>> {
        for entry in by_hash.iter().filter(|e| !e.trashed) {
            let Some(existing) = self.locate(entry) else {
                continue;
            };
            verify_identical(&candidate.path, &existing)?;
            return Ok(Some(Classification::hit(
                MatchType::BinaryMatchImages,
                entry.key,
                format!("Identical to {}", entry.new_name),
            )));
        }
        Ok(None)
    }

    fn match_trashed_by_hash(
        &self,
        candidate: &Candidate<'_>,
        by_hash: &[LibraryEntry],
    ) -> Result<Option<Classification>> {
        let Some(entry) = by_hash.iter().find(|e| e.trashed) else {
            return Ok(None);
        };
        let found = match self.locate(entry) {
            Some(existing) => {
                verify_identical(&candidate.path, &existing)?;
                Classification::hit(
                    MatchType::BinaryMatchTrash,
                    entry.key,
                    format!("Identical to trashed {}", entry.new_name),
                )
            }
            None => Classification::hit(
                MatchType::HashMatchTrash,
                entry.key,
                format!("Same hash as deleted {}", entry.new_name),
            ),
        };
        Ok(Some(found))
    }

    fn match_replaced_by_hash(&self, candidate: &Candidate<'_>) -> Result<Option<Classification>> {
        let replaced = self
            .database()
            .replaced_by_hash(candidate.content_hash)?
            .into_iter()
            .find(|r| candidate.same_content_key(&r.entry));
        let Some(replaced) = replaced else {
            return Ok(None);
        };

        let former = self.trash_path(&replaced.former_name);
        let found = if former.is_file() {
            verify_identical(&candidate.path, &former)?;
            Classification::hit(
                MatchType::BinaryMatchReplaced,
                replaced.entry.key,
                format!(
                    "Identical to {}, merged into {}",
                    replaced.former_name, replaced.successor
                ),
            )
        } else {
            Classification::hit(
                MatchType::HashMatchReplaced,
                replaced.entry.key,
                format!(
                    "Same hash as {}, merged into {}",
                    replaced.former_name, replaced.successor
                ),
            )
        };
        Ok(Some(found))
    }
}

/// Hash and size already agree; differing bytes mean a collision or corruption.
fn verify_identical(candidate: &Path, existing: &Path) -> Result<()> {
    if hasher::files_identical(candidate, existing)? {
        return Ok(());
    }
    warn!(
        "Hash collision or corruption: {} vs {}",
        candidate.display(),
        existing.display()
    );
    Err(Error::HashBinaryMismatch {
        candidate: candidate.to_path_buf(),
        existing: existing.to_path_buf(),
    })
}
