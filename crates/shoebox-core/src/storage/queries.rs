use super::models::*;
use super::sqlite::Database;
use crate::metadata::ExtractedMetadata;
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Result, Row};
use serde_json::Value;
use tracing::debug;

const ENTRY_SELECT: &str = "SELECT key, org_fname, org_fpath, metadata, provenance_metadata, \
     naming_tag, content_hash, new_name, datetime, present, trashed, verify, provenance_status";

const STAGED_SELECT: &str = "SELECT key, org_fname, org_fpath, metadata, provenance_metadata, \
     content_hash, imported, allowed, match_type, message, datetime, naming_tag, \"match\", \
     import_key";

fn entry_from_row(row: &Row<'_>) -> Result<LibraryEntry> {
    Ok(LibraryEntry {
        key: row.get(0)?,
        org_fname: row.get(1)?,
        org_fpath: row.get(2)?,
        metadata: row.get(3)?,
        provenance_metadata: row.get(4)?,
        naming_tag: row.get(5)?,
        content_hash: row.get(6)?,
        new_name: row.get(7)?,
        datetime: row.get(8)?,
        present: row.get(9)?,
        trashed: row.get(10)?,
        verify: row.get(11)?,
        provenance_status: ProvenanceStatus::from_code(row.get(12)?),
    })
}

fn replaced_from_row(row: &Row<'_>) -> Result<ReplacedEntry> {
    Ok(ReplacedEntry {
        entry: entry_from_row(row)?,
        successor: row.get(13)?,
        former_name: row.get(14)?,
    })
}

fn staged_from_row(row: &Row<'_>) -> Result<StagedFile> {
    let match_code: Option<i64> = row.get(8)?;
    Ok(StagedFile {
        key: row.get(0)?,
        org_fname: row.get(1)?,
        org_fpath: row.get(2)?,
        metadata: row.get(3)?,
        provenance_metadata: row.get(4)?,
        content_hash: row.get(5)?,
        imported: row.get(6)?,
        allowed: row.get(7)?,
        match_type: match_code.and_then(MatchType::from_code),
        message: row.get(9)?,
        datetime: row.get(10)?,
        naming_tag: row.get(11)?,
        matched_key: row.get(12)?,
        import_key: row.get(13)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> Result<ImportBatch> {
    Ok(ImportBatch {
        key: row.get(0)?,
        root_path: row.get(1)?,
        table_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl Database {
    // ── Library Entries ──────────────────────────────────────────

    /// Insert a new live entry; `entry.key` is ignored and the assigned key returned.
    pub fn insert_entry(&self, entry: &LibraryEntry) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO images \
             (org_fname, org_fpath, metadata, provenance_metadata, naming_tag, content_hash, \
              new_name, datetime, present, trashed, verify, provenance_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.org_fname,
                entry.org_fpath,
                entry.metadata,
                entry.provenance_metadata,
                entry.naming_tag,
                entry.content_hash,
                entry.new_name,
                entry.datetime,
                entry.present,
                entry.trashed,
                entry.verify,
                entry.provenance_status.code(),
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// All `images` rows with this key. More than one means the catalog is corrupt.
    pub fn entries_with_key(&self, key: i64) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self
            .connection()
            .prepare_cached(&format!("{ENTRY_SELECT} FROM images WHERE key = ?1"))?;
        let rows = stmt
            .query_map(params![key], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn entries_named(&self, name: &str) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self
            .connection()
            .prepare_cached(&format!("{ENTRY_SELECT} FROM images WHERE new_name = ?1"))?;
        let rows = stmt
            .query_map(params![name], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn entries_by_hash(&self, content_hash: &str) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "{ENTRY_SELECT} FROM images WHERE content_hash = ?1 ORDER BY key"
        ))?;
        let rows = stmt
            .query_map(params![content_hash], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn entries_by_datetime(&self, datetime: &NaiveDateTime) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "{ENTRY_SELECT} FROM images WHERE datetime = ?1 ORDER BY key"
        ))?;
        let rows = stmt
            .query_map(params![datetime], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_entries(&self) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{ENTRY_SELECT} FROM images ORDER BY key"))?;
        let rows = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_entry_flags(&self, key: i64, present: bool, trashed: bool) -> Result<usize> {
        self.connection().execute(
            "UPDATE images SET present = ?1, trashed = ?2 WHERE key = ?3",
            params![present, trashed, key],
        )
    }

    pub fn update_entry_name(
        &self,
        key: i64,
        new_name: &str,
        naming_tag: &str,
        datetime: &NaiveDateTime,
        verify: bool,
    ) -> Result<usize> {
        self.connection().execute(
            "UPDATE images SET new_name = ?1, naming_tag = ?2, datetime = ?3, verify = ?4 \
             WHERE key = ?5",
            params![new_name, naming_tag, datetime, verify, key],
        )
    }

    /// Write provenance metadata only if the entry has none yet. Returns rows changed.
    pub fn fill_provenance(
        &self,
        key: i64,
        provenance: &Value,
        status: ProvenanceStatus,
    ) -> Result<usize> {
        self.connection().execute(
            "UPDATE images SET provenance_metadata = ?1, provenance_status = ?2 \
             WHERE key = ?3 AND provenance_status = ?4 AND provenance_metadata IS NULL",
            params![provenance, status.code(), key, ProvenanceStatus::Absent.code()],
        )
    }

    pub fn delete_entry(&self, key: i64) -> Result<usize> {
        self.connection()
            .execute("DELETE FROM images WHERE key = ?1", params![key])
    }

    pub fn entry_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
    }

    // ── Name Ledger ──────────────────────────────────────────────

    pub fn is_name_reserved(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .connection()
            .query_row(
                "SELECT 1 FROM names WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns false if the name was already taken.
    pub fn reserve_name(&self, name: &str) -> Result<bool> {
        let inserted = self
            .connection()
            .execute("INSERT OR IGNORE INTO names (name) VALUES (?1)", params![name])?;
        Ok(inserted == 1)
    }

    pub fn release_name(&self, name: &str) -> Result<usize> {
        self.connection()
            .execute("DELETE FROM names WHERE name = ?1", params![name])
    }

    pub fn name_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM names", [], |row| row.get(0))
    }

    // ── Replaced Entries ─────────────────────────────────────────

    pub fn insert_replaced(&self, replaced: &ReplacedEntry) -> Result<()> {
        let e = &replaced.entry;
        self.connection().execute(
            "INSERT INTO replaced \
             (key, org_fname, org_fpath, metadata, provenance_metadata, naming_tag, \
              content_hash, new_name, datetime, present, trashed, verify, provenance_status, \
              successor, former_name) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                e.key,
                e.org_fname,
                e.org_fpath,
                e.metadata,
                e.provenance_metadata,
                e.naming_tag,
                e.content_hash,
                e.new_name,
                e.datetime,
                e.present,
                e.trashed,
                e.verify,
                e.provenance_status.code(),
                replaced.successor,
                replaced.former_name,
            ],
        )?;
        Ok(())
    }

    pub fn replaced_with_key(&self, key: i64) -> Result<Vec<ReplacedEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "{ENTRY_SELECT}, successor, former_name FROM replaced WHERE key = ?1"
        ))?;
        let rows = stmt
            .query_map(params![key], replaced_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn replaced_by_hash(&self, content_hash: &str) -> Result<Vec<ReplacedEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "{ENTRY_SELECT}, successor, former_name FROM replaced \
             WHERE content_hash = ?1 ORDER BY key"
        ))?;
        let rows = stmt
            .query_map(params![content_hash], replaced_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_replaced(&self) -> Result<Vec<ReplacedEntry>> {
        let mut stmt = self.connection().prepare(&format!(
            "{ENTRY_SELECT}, successor, former_name FROM replaced ORDER BY key"
        ))?;
        let rows = stmt
            .query_map([], replaced_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of replaced entries whose former name is `name`.
    pub fn replaced_named(&self, name: &str) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM replaced WHERE former_name = ?1",
            params![name],
            |row| row.get(0),
        )
    }

    /// Repoint every replaced entry whose successor is `from` to `to`.
    pub fn reparent_replaced(&self, from: i64, to: i64) -> Result<usize> {
        let changed = self.connection().execute(
            "UPDATE replaced SET successor = ?1 WHERE successor = ?2",
            params![to, from],
        )?;
        if changed > 0 {
            debug!("Reparented {} replaced entries from {} to {}", changed, from, to);
        }
        Ok(changed)
    }

    pub fn set_replaced_successor(&self, key: i64, successor: i64) -> Result<usize> {
        self.connection().execute(
            "UPDATE replaced SET successor = ?1 WHERE key = ?2",
            params![successor, key],
        )
    }

    pub fn replaced_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM replaced", [], |row| row.get(0))
    }

    // ── Import Batches ───────────────────────────────────────────

    /// Register a batch and return it; the staging table itself is created by the caller.
    pub fn insert_import_batch(&self, root_path: &str) -> Result<ImportBatch> {
        let tx = self.connection().unchecked_transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO import_tables (root_path, table_name, created_at) \
             VALUES (?1, 'pending', ?2)",
            params![root_path, now],
        )?;
        let key = tx.last_insert_rowid();
        let table_name = super::schema::staging_table_name(key);
        tx.execute(
            "UPDATE import_tables SET table_name = ?1 WHERE key = ?2",
            params![table_name, key],
        )?;
        tx.commit()?;
        Ok(ImportBatch {
            key,
            root_path: root_path.to_string(),
            table_name,
            created_at: now,
        })
    }

    pub fn get_import_batch(&self, key: i64) -> Result<Option<ImportBatch>> {
        self.connection()
            .query_row(
                "SELECT key, root_path, table_name, created_at FROM import_tables WHERE key = ?1",
                params![key],
                batch_from_row,
            )
            .optional()
    }

    pub fn list_import_batches(&self) -> Result<Vec<ImportBatch>> {
        let mut stmt = self.connection().prepare(
            "SELECT key, root_path, table_name, created_at FROM import_tables ORDER BY key",
        )?;
        let rows = stmt
            .query_map([], batch_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Drop a batch's staging table and its registry row.
    pub fn drop_import_batch(&self, batch: &ImportBatch) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", batch.table_name))?;
        tx.execute(
            "DELETE FROM import_tables WHERE key = ?1",
            params![batch.key],
        )?;
        tx.commit()?;
        debug!("Dropped staging table {}", batch.table_name);
        Ok(())
    }

    // ── Staging Rows ─────────────────────────────────────────────

    /// Insert a candidate or update its allow flag if it changed. Returns rows touched.
    pub fn upsert_staged_file(
        &self,
        table: &str,
        org_fpath: &str,
        org_fname: &str,
        allowed: bool,
    ) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "INSERT INTO \"{table}\" (org_fname, org_fpath, allowed) VALUES (?1, ?2, ?3) \
             ON CONFLICT(org_fpath, org_fname) DO UPDATE SET allowed = excluded.allowed \
             WHERE allowed <> excluded.allowed"
        ))?;
        stmt.execute(params![org_fname, org_fpath, allowed])
    }

    pub fn staged_files(&self, table: &str) -> Result<Vec<StagedFile>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{STAGED_SELECT} FROM \"{table}\" ORDER BY key"))?;
        let rows = stmt
            .query_map([], staged_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn staged_file(&self, table: &str, key: i64) -> Result<Option<StagedFile>> {
        self.connection()
            .query_row(
                &format!("{STAGED_SELECT} FROM \"{table}\" WHERE key = ?1"),
                params![key],
                staged_from_row,
            )
            .optional()
    }

    pub fn set_staged_metadata(
        &self,
        table: &str,
        key: i64,
        extracted: &ExtractedMetadata,
    ) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "UPDATE \"{table}\" SET metadata = ?1, provenance_metadata = ?2, content_hash = ?3, \
             naming_tag = ?4, datetime = ?5, message = NULL, match_type = NULL, \"match\" = NULL \
             WHERE key = ?6"
        ))?;
        stmt.execute(params![
            extracted.metadata,
            extracted.provenance_metadata,
            extracted.content_hash,
            extracted.naming_tag,
            extracted.canonical_timestamp,
            key,
        ])
    }

    pub fn set_staged_message(&self, table: &str, key: i64, message: &str) -> Result<usize> {
        self.connection().execute(
            &format!("UPDATE \"{table}\" SET message = ?1 WHERE key = ?2"),
            params![message, key],
        )
    }

    pub fn set_staged_match(
        &self,
        table: &str,
        key: i64,
        match_type: MatchType,
        matched_key: Option<i64>,
        message: &str,
    ) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "UPDATE \"{table}\" SET match_type = ?1, \"match\" = ?2, message = ?3 WHERE key = ?4"
        ))?;
        stmt.execute(params![match_type.code(), matched_key, message, key])
    }

    pub fn mark_staged_imported(&self, table: &str, key: i64, import_key: i64) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "UPDATE \"{table}\" SET imported = 1, import_key = ?1 WHERE key = ?2"
        ))?;
        stmt.execute(params![import_key, key])
    }

    // ── Duplicate Registry ───────────────────────────────────────

    pub fn insert_duplicate_cluster(&self, match_type: &str, keys: &[i64]) -> Result<i64> {
        let encoded = serde_json::to_string(keys)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.connection().execute(
            "INSERT INTO duplicates (match_type, matched_keys) VALUES (?1, ?2)",
            params![match_type, encoded],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn duplicate_clusters(&self) -> Result<Vec<DuplicateCluster>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT key, match_type, matched_keys FROM duplicates ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| {
                let encoded: String = row.get(2)?;
                let matched_keys: Vec<i64> = serde_json::from_str(&encoded).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(DuplicateCluster {
                    key: row.get(0)?,
                    match_type: row.get(1)?,
                    matched_keys,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_duplicate_cluster(&self, key: i64) -> Result<usize> {
        self.connection()
            .execute("DELETE FROM duplicates WHERE key = ?1", params![key])
    }

    pub fn clear_duplicates(&self) -> Result<usize> {
        self.connection().execute("DELETE FROM duplicates", [])
    }

    pub fn duplicate_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM duplicates", [], |row| row.get(0))
    }
}
