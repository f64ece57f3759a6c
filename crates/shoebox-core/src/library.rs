use crate::config::LibraryConfig;
use crate::error::{Error, Result};
use crate::metadata::is_filesystem_tag;
use crate::naming;
use crate::storage::models::{EntryState, LibraryEntry, ReplacedEntry};
use crate::storage::{at_most_one, Database, SchemaIssue};
use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CATALOG_NAME: &str = ".photos.db";
pub const TRASH_DIR: &str = ".trash";
pub const THUMBNAIL_DIR: &str = ".thumbnails";

/// An open photo library: a root directory plus its catalog.
///
/// Single-threaded: one connection, no internal locking.
pub struct Library {
    root: PathBuf,
    db: Database,
    config: LibraryConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LibraryStats {
    pub active: usize,
    pub soft_deleted: usize,
    pub hard_deleted: usize,
    pub anomalous: usize,
    pub replaced: i64,
    pub reserved_names: i64,
    pub pending_clusters: i64,
    pub open_batches: usize,
}

/// A disagreement between the catalog's flags and the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Flags say the file exists, but nothing is on disk.
    MissingFile { key: i64, expected: PathBuf },
    /// Flags say the file is gone, but it is still on disk.
    UnexpectedFile { key: i64, found: PathBuf },
    /// Neither present nor trashed.
    AnomalousState { key: i64 },
}

impl Library {
    /// Initialise a new library at `root`, creating the directory layout and catalog.
    pub fn create(root: &Path, config: LibraryConfig) -> Result<Self> {
        fs::create_dir_all(root)?;
        let catalog = root.join(CATALOG_NAME);
        if catalog.exists() {
            return Err(Error::Validation(format!(
                "'{}' already holds a catalog",
                root.display()
            )));
        }
        info!("Creating library at {}", root.display());
        let db = Database::open(&catalog)?;
        Self::with_database(root, db, config)
    }

    /// Open an existing library. Fails if `root` is not a directory or has no catalog.
    pub fn open(root: &Path, config: LibraryConfig) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Validation(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }
        let catalog = root.join(CATALOG_NAME);
        if !catalog.is_file() {
            return Err(Error::Validation(format!(
                "no catalog at '{}'",
                catalog.display()
            )));
        }

        let db = Database::open(&catalog)?;
        if !db.schema_issues().is_empty() {
            warn!(
                "Catalog schema differs from expected in {} tables; continuing",
                db.schema_issues().len()
            );
        }
        Self::with_database(root, db, config)
    }

    fn with_database(root: &Path, db: Database, config: LibraryConfig) -> Result<Self> {
        for dir in [TRASH_DIR, THUMBNAIL_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        debug!("Opened library at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            db,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn schema_issues(&self) -> &[SchemaIssue] {
        self.db.schema_issues()
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.root.join(THUMBNAIL_DIR)
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn find_entry(&self, key: i64) -> Result<Option<LibraryEntry>> {
        at_most_one(self.db.entries_with_key(key)?, || {
            format!("images key {key} is not unique")
        })
    }

    pub fn entry(&self, key: i64) -> Result<LibraryEntry> {
        self.find_entry(key)?.ok_or(Error::UnknownEntry(key))
    }

    pub fn replaced_entry(&self, key: i64) -> Result<Option<ReplacedEntry>> {
        at_most_one(self.db.replaced_with_key(key)?, || {
            format!("replaced key {key} is not unique")
        })
    }

    pub fn entries(&self) -> Result<Vec<LibraryEntry>> {
        Ok(self.db.all_entries()?)
    }

    pub fn replaced_entries(&self) -> Result<Vec<ReplacedEntry>> {
        Ok(self.db.all_replaced()?)
    }

    // ── Paths ────────────────────────────────────────────────────

    pub fn tree_path(&self, name: &str, datetime: &NaiveDateTime) -> PathBuf {
        naming::date_dir(&self.root, datetime).join(name)
    }

    pub fn trash_path(&self, name: &str) -> PathBuf {
        self.trash_dir().join(name)
    }

    /// Where the flags say the entry's file lives.
    pub fn stored_path(&self, entry: &LibraryEntry) -> PathBuf {
        if entry.trashed {
            self.trash_path(&entry.new_name)
        } else {
            self.tree_path(&entry.new_name, &entry.datetime)
        }
    }

    pub fn thumbnail_path(&self, entry: &LibraryEntry) -> PathBuf {
        self.thumbnail_dir()
            .join(format!("thumb_{}{}", entry.key, entry.extension()))
    }

    /// Resolve an entry to the file actually on disk.
    ///
    /// The filesystem wins: if the file is in the other managed location, that path is returned;
    /// any disagreement with the flags is logged and otherwise tolerated.
    pub fn locate(&self, entry: &LibraryEntry) -> Option<PathBuf> {
        let expected = self.stored_path(entry);
        if expected.is_file() {
            if !entry.present {
                warn!(
                    "Entry {} is flagged absent but exists at {}",
                    entry.key,
                    expected.display()
                );
            }
            return Some(expected);
        }

        let alternate = if entry.trashed {
            self.tree_path(&entry.new_name, &entry.datetime)
        } else {
            self.trash_path(&entry.new_name)
        };
        if alternate.is_file() {
            warn!(
                "Entry {} found at {} instead of {}",
                entry.key,
                alternate.display(),
                expected.display()
            );
            return Some(alternate);
        }

        if entry.present {
            warn!(
                "Missing file for entry {}: expected {}",
                entry.key,
                expected.display()
            );
        }
        None
    }

    /// Canonical on-disk path of an entry, if its file exists.
    pub fn entry_path(&self, key: i64) -> Result<Option<PathBuf>> {
        let entry = self.entry(key)?;
        Ok(self.locate(&entry))
    }

    // ── State Transitions ────────────────────────────────────────

    /// Move an active entry's file into the trash.
    pub fn trash_entry(&self, key: i64) -> Result<()> {
        let entry = self.entry(key)?;
        if entry.trashed {
            debug!("Entry {} is already trashed", key);
            return Ok(());
        }
        let target = self.trash_path(&entry.new_name);
        let present = match self.locate(&entry) {
            Some(source) => {
                move_file(&source, &target)?;
                true
            }
            None => false,
        };
        self.db.update_entry_flags(key, present, true)?;
        info!("Trashed entry {} ({})", key, entry.new_name);
        Ok(())
    }

    /// Move a trashed entry's file back into the datetime tree.
    pub fn restore_entry(&self, key: i64) -> Result<()> {
        let entry = self.entry(key)?;
        if !entry.trashed {
            debug!("Entry {} is not trashed", key);
            return Ok(());
        }
        let source = self.locate(&entry).ok_or_else(|| {
            Error::Validation(format!(
                "entry {} cannot be restored: its file is gone",
                key
            ))
        })?;
        let target = self.tree_path(&entry.new_name, &entry.datetime);
        move_file(&source, &target)?;
        self.db.update_entry_flags(key, true, false)?;
        info!("Restored entry {} to {}", key, target.display());
        Ok(())
    }

    /// Remove the file for good but keep the row, so its hash still blocks re-import.
    pub fn delete_entry_file(&self, key: i64) -> Result<()> {
        let entry = self.entry(key)?;
        if let Some(path) = self.locate(&entry) {
            fs::remove_file(&path)?;
        }
        remove_if_exists(&self.thumbnail_path(&entry))?;
        self.db.update_entry_flags(key, false, true)?;
        info!("Deleted file of entry {} ({})", key, entry.new_name);
        Ok(())
    }

    /// Destroy an entry: remove its file and row. Its name stays reserved.
    pub fn forget_entry(&self, key: i64) -> Result<()> {
        let entry = self.entry(key)?;
        if let Some(path) = self.locate(&entry) {
            fs::remove_file(&path)?;
        }
        remove_if_exists(&self.thumbnail_path(&entry))?;
        self.db.delete_entry(key)?;
        info!("Forgot entry {} ({})", key, entry.new_name);
        Ok(())
    }

    /// Give an entry a new timestamp and therefore a new name and directory.
    ///
    /// The previous name stays in the ledger until released with [`Library::release_name`].
    pub fn rename_entry(
        &self,
        key: i64,
        datetime: NaiveDateTime,
        naming_tag: &str,
    ) -> Result<String> {
        let entry = self.entry(key)?;
        let source = self.locate(&entry);
        if source.is_none() {
            warn!("Renaming entry {} without a file on disk", key);
        }

        let new_name =
            naming::allocate_and_place(&self.db, &datetime, &entry.extension(), |name| {
                let target = if entry.trashed {
                    self.trash_path(name)
                } else {
                    self.tree_path(name, &datetime)
                };
                match &source {
                    Some(source) => move_file(source, &target),
                    None if target.exists() => Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already exists", target.display()),
                    )),
                    None => Ok(()),
                }
            })?;

        self.db.update_entry_name(
            key,
            &new_name,
            naming_tag,
            &datetime,
            is_filesystem_tag(naming_tag),
        )?;
        info!("Renamed entry {}: {} -> {}", key, entry.new_name, new_name);
        Ok(new_name)
    }

    /// Free a ledger name for reuse. Refuses names still owned by an entry.
    pub fn release_name(&self, name: &str) -> Result<bool> {
        if let Some(owner) = at_most_one(self.db.entries_named(name)?, || {
            format!("name '{name}' is owned by several entries")
        })? {
            return Err(Error::IntegrityViolation(format!(
                "name '{}' is still owned by entry {}",
                name, owner.key
            )));
        }
        if self.db.replaced_named(name)? > 0 {
            return Err(Error::IntegrityViolation(format!(
                "name '{}' is still owned by a replaced entry",
                name
            )));
        }
        Ok(self.db.release_name(name)? > 0)
    }

    // ── Reporting ────────────────────────────────────────────────

    pub fn stats(&self) -> Result<LibraryStats> {
        let mut stats = LibraryStats {
            replaced: self.db.replaced_count()?,
            reserved_names: self.db.name_count()?,
            pending_clusters: self.db.duplicate_count()?,
            open_batches: self.db.list_import_batches()?.len(),
            ..Default::default()
        };
        for entry in self.db.all_entries()? {
            match entry.state() {
                EntryState::Active => stats.active += 1,
                EntryState::SoftDeleted => stats.soft_deleted += 1,
                EntryState::HardDeleted => stats.hard_deleted += 1,
                EntryState::Anomalous => stats.anomalous += 1,
            }
        }
        Ok(stats)
    }

    /// Compare every entry's flags with the filesystem.
    pub fn check_integrity(&self) -> Result<Vec<IntegrityIssue>> {
        let mut issues = Vec::new();
        for entry in self.db.all_entries()? {
            let on_disk = self.stored_path(&entry).is_file();
            match entry.state() {
                EntryState::Active | EntryState::SoftDeleted if !on_disk => {
                    warn!("Entry {} is missing from disk", entry.key);
                    issues.push(IntegrityIssue::MissingFile {
                        key: entry.key,
                        expected: self.stored_path(&entry),
                    });
                }
                EntryState::HardDeleted if on_disk => {
                    warn!("Deleted entry {} still has a file", entry.key);
                    issues.push(IntegrityIssue::UnexpectedFile {
                        key: entry.key,
                        found: self.stored_path(&entry),
                    });
                }
                EntryState::Anomalous => {
                    warn!("Entry {} is neither present nor trashed", entry.key);
                    issues.push(IntegrityIssue::AnomalousState { key: entry.key });
                }
                _ => {}
            }
        }
        info!("Integrity check found {} issues", issues.len());
        Ok(issues)
    }
}

/// Rename, falling back to copy + remove across filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to overwrite {}", to.display()),
        ));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
