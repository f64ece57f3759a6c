use crate::config::LibraryConfig;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::metadata::is_filesystem_tag;
use crate::naming;
use crate::progress::ProgressReporter;
use crate::storage::models::{
    extension_with_dot, ImportBatch, LibraryEntry, MatchType, ProvenanceStatus, StagedFile,
};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Match types whose rows get imported. Defaults to `No_Match` only.
    pub accepted: BTreeSet<MatchType>,
    pub propagate_provenance: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            accepted: BTreeSet::from([MatchType::NoMatch]),
            propagate_provenance: true,
        }
    }
}

impl CommitOptions {
    pub fn from_config(config: &LibraryConfig) -> Self {
        Self {
            propagate_provenance: config.propagate_provenance,
            ..Self::default()
        }
    }

    pub fn accept(mut self, match_types: impl IntoIterator<Item = MatchType>) -> Self {
        self.accepted = match_types.into_iter().collect();
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub imported: usize,
    pub failed: usize,
    pub provenance_copied: usize,
}

impl Library {
    /// Copy every accepted, not yet imported row of a batch into the library.
    ///
    /// Each accepted row becomes a new entry, whatever it matched. Rows that fail to copy keep a
    /// message and stay unimported. Name exhaustion and database errors stop the run, keeping the
    /// rows imported so far.
    pub fn import_folder(
        &self,
        batch: &ImportBatch,
        options: &CommitOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<CommitReport> {
        let start = Instant::now();
        let table = batch.table_name.as_str();
        let rows: Vec<StagedFile> = self
            .database()
            .staged_files(table)?
            .into_iter()
            .filter(|row| {
                row.allowed
                    && !row.imported
                    && row
                        .match_type
                        .is_some_and(|m| options.accepted.contains(&m))
            })
            .collect();

        let mut report = CommitReport::default();
        reporter.on_commit_start(rows.len());

        let tx = self.database().connection().unchecked_transaction()?;
        for (done, row) in rows.iter().enumerate() {
            match self.import_row(row) {
                Ok(key) => {
                    self.database().mark_staged_imported(table, row.key, key)?;
                    report.imported += 1;
                }
                Err(Error::Io(e)) => {
                    error!("Failed to import {}: {}", row.source_path().display(), e);
                    self.database().set_staged_message(
                        table,
                        row.key,
                        &format!("Import failed: {}", e),
                    )?;
                    report.failed += 1;
                }
                Err(e) => {
                    error!(
                        "Import of batch {} stopped after {} files: {}",
                        batch.key, report.imported, e
                    );
                    tx.commit()?;
                    return Err(e);
                }
            }
            reporter.on_commit_progress(done + 1);
        }
        tx.commit()?;

        if options.propagate_provenance {
            report.provenance_copied = self.propagate_provenance(batch)?;
        }

        let duration = start.elapsed().as_secs_f64();
        reporter.on_commit_complete(report.imported, duration);
        info!(
            "Imported {} files from batch {} in {:.2}s ({} failed, {} provenance copies)",
            report.imported, batch.key, duration, report.failed, report.provenance_copied
        );
        Ok(report)
    }

    fn import_row(&self, row: &StagedFile) -> Result<i64> {
        let source = row.source_path();
        let (Some(metadata), Some(content_hash), Some(datetime), Some(naming_tag)) = (
            row.metadata.as_ref(),
            row.content_hash.as_ref(),
            row.datetime,
            row.naming_tag.as_ref(),
        ) else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "staged row has no metadata",
            )));
        };

        let extension = extension_with_dot(&source);
        let new_name =
            naming::allocate_and_place(self.database(), &datetime, &extension, |name| {
                copy_preserving_mtime(&source, &self.tree_path(name, &datetime))
            })?;
        let target = self.tree_path(&new_name, &datetime);

        let entry = LibraryEntry {
            key: 0,
            org_fname: row.org_fname.clone(),
            org_fpath: row.org_fpath.clone(),
            metadata: metadata.clone(),
            provenance_metadata: row.provenance_metadata.clone(),
            naming_tag: naming_tag.clone(),
            content_hash: content_hash.clone(),
            new_name,
            datetime,
            present: true,
            trashed: false,
            verify: is_filesystem_tag(naming_tag),
            provenance_status: if row.provenance_metadata.is_some() {
                ProvenanceStatus::Original
            } else {
                ProvenanceStatus::Absent
            },
        };
        let key = self.database().insert_entry(&entry)?;
        debug!("{} -> {} (key {})", source.display(), target.display(), key);
        Ok(key)
    }

    /// Copy provenance metadata from each imported row's match onto its new entry.
    ///
    /// Only entries without provenance receive it, so repeating the pass changes nothing.
    fn propagate_provenance(&self, batch: &ImportBatch) -> Result<usize> {
        let mut copied = 0;
        for row in self.database().staged_files(&batch.table_name)? {
            let (Some(import_key), Some(match_type), Some(matched_key)) =
                (row.import_key, row.match_type, row.matched_key)
            else {
                continue;
            };
            if match_type == MatchType::NoMatch {
                continue;
            }

            let provenance = if match_type.points_at_replaced() {
                self.replaced_entry(matched_key)?
                    .and_then(|r| r.entry.provenance_metadata)
            } else {
                self.find_entry(matched_key)?
                    .and_then(|e| e.provenance_metadata)
            };
            let Some(provenance) = provenance else {
                continue;
            };

            let changed = self.database().fill_provenance(
                import_key,
                &provenance,
                ProvenanceStatus::CopiedFromMatch,
            )?;
            if changed > 0 {
                debug!(
                    "Copied provenance of {} onto entry {}",
                    matched_key, import_key
                );
                copied += changed;
            }
        }
        Ok(copied)
    }
}

/// Copy `from` to a new file at `to`, carrying over its modification time.
fn copy_preserving_mtime(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    let modified = fs::metadata(from)?.modified()?;
    fs::copy(from, to)?;
    let copied = File::options().write(true).open(to)?;
    if let Err(e) = copied.set_modified(modified) {
        warn!("Could not keep modification time on {}: {}", to.display(), e);
    }
    Ok(())
}
