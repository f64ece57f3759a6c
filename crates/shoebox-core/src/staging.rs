use crate::config::LibraryConfig;
use crate::error::{Error, Result};
use crate::library::{Library, CATALOG_NAME};
use crate::metadata::MetadataExtractor;
use crate::progress::{CancellationToken, ProgressReporter};
use crate::scanner;
use crate::storage::models::{ImportBatch, StagedFile};
use crate::storage::schema;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info};

/// Knobs for one `prepare_import` run.
#[derive(Debug, Clone, Default)]
pub struct StagingOptions {
    /// Overrides the library's allowed extensions for this run.
    pub allowed_extensions: Option<Vec<String>>,
    /// Re-extract metadata for every allowed row, not just rows that have none.
    pub recompute: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagingReport {
    pub listed: usize,
    pub allowed: usize,
    /// Rows inserted or whose allow flag flipped.
    pub changed: usize,
    pub extracted: usize,
    pub failed: usize,
}

impl Library {
    /// Register a new import batch for `folder` and create its staging table.
    pub fn create_import_batch(&self, folder: &Path) -> Result<ImportBatch> {
        if !folder.is_dir() {
            return Err(Error::Validation(format!(
                "import source '{}' is not a directory",
                folder.display()
            )));
        }
        let folder = fs::canonicalize(folder)?;
        let batch = self
            .database()
            .insert_import_batch(&folder.to_string_lossy())?;
        self.database()
            .connection()
            .execute_batch(&schema::staging_table_sql(&batch.table_name))?;
        info!(
            "Created import batch {} for {}",
            batch.key,
            folder.display()
        );
        Ok(batch)
    }

    pub fn import_batch(&self, key: i64) -> Result<ImportBatch> {
        self.database()
            .get_import_batch(key)?
            .ok_or(Error::UnknownBatch(key))
    }

    pub fn import_batches(&self) -> Result<Vec<ImportBatch>> {
        Ok(self.database().list_import_batches()?)
    }

    pub fn staged_files(&self, batch: &ImportBatch) -> Result<Vec<StagedFile>> {
        Ok(self.database().staged_files(&batch.table_name)?)
    }

    /// List the batch folder into its staging table, then extract metadata where needed.
    ///
    /// Restartable: existing rows are never duplicated and rows that already carry metadata are
    /// skipped unless `recompute` is set. Cancellation is checked between files; rows finished
    /// before the cancel keep their metadata.
    pub fn prepare_import(
        &self,
        batch: &ImportBatch,
        options: &StagingOptions,
        extractor: &dyn MetadataExtractor,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StagingReport> {
        let start = Instant::now();
        let folder = Path::new(&batch.root_path);
        let table = batch.table_name.as_str();
        let filter = match &options.allowed_extensions {
            Some(extensions) => LibraryConfig::default().with_extensions(extensions),
            None => self.config().clone(),
        };

        let mut report = StagingReport::default();
        let patterns = scanner::compile_patterns(&self.config().ignore_patterns);
        let skip = vec![self.trash_dir(), self.thumbnail_dir()];
        let files = scanner::list_files(folder, &patterns, &skip)?;
        report.listed = files.len();

        {
            let tx = self.database().connection().unchecked_transaction()?;
            for path in &files {
                let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                    continue;
                };
                let name = name.to_string_lossy();
                if name.starts_with(CATALOG_NAME) {
                    continue;
                }
                let allowed = filter.is_allowed(path);
                if allowed {
                    report.allowed += 1;
                }
                report.changed += self.database().upsert_staged_file(
                    table,
                    &parent.to_string_lossy(),
                    &name,
                    allowed,
                )?;
            }
            tx.commit()?;
        }
        debug!(
            "Listed {} files in {} ({} allowed, {} rows changed)",
            report.listed, batch.root_path, report.allowed, report.changed
        );

        let pending: Vec<StagedFile> = self
            .database()
            .staged_files(table)?
            .into_iter()
            .filter(|row| row.allowed && !row.imported && (options.recompute || !row.has_metadata()))
            .collect();

        reporter.on_stage_start(pending.len());
        for (done, row) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Staging of batch {} cancelled after {} files",
                    batch.key, done
                );
                return Err(Error::Cancelled);
            }

            let path = row.source_path();
            let path_str = path.to_string_lossy();
            reporter.on_stage_progress(done, &path_str);

            match extractor.extract(&path) {
                Ok(extracted) => {
                    self.database()
                        .set_staged_metadata(table, row.key, &extracted)?;
                    report.extracted += 1;
                }
                Err(e) => {
                    error!("Metadata extraction failed for {}: {}", path_str, e);
                    self.database().set_staged_message(
                        table,
                        row.key,
                        &format!("Metadata extraction failed: {}", e),
                    )?;
                    report.failed += 1;
                }
            }
        }

        let duration = start.elapsed().as_secs_f64();
        reporter.on_stage_complete(report.extracted, duration);
        info!(
            "Staged batch {}: {} files, {} extracted, {} failed in {:.2}s",
            batch.key, report.listed, report.extracted, report.failed, duration
        );
        Ok(report)
    }

    /// Abandon a batch: drop its staging table without touching the library.
    pub fn revert_import_batch(&self, batch: &ImportBatch) -> Result<()> {
        self.database().drop_import_batch(batch)?;
        info!("Reverted import batch {}", batch.key);
        Ok(())
    }

    /// Drop a batch's staging table once its rows have been committed.
    pub fn finish_import_batch(&self, batch: &ImportBatch) -> Result<()> {
        let pending = self
            .staged_files(batch)?
            .iter()
            .filter(|row| row.allowed && !row.imported)
            .count();
        if pending > 0 {
            debug!(
                "Finishing batch {} with {} allowed rows not imported",
                batch.key, pending
            );
        }
        self.database().drop_import_batch(batch)?;
        info!("Finished import batch {}", batch.key);
        Ok(())
    }
}
