use crate::error::{Error, Result};
use crate::library::{move_file, remove_if_exists, Library};
use crate::storage::models::{LibraryEntry, ReplacedEntry};
use std::collections::{HashMap, HashSet};
use std::fs;
use tracing::{info, warn};

impl Library {
    /// Fold `duplicate` into `successor`.
    ///
    /// The duplicate's row becomes a replaced entry pointing at `successor`, anything that
    /// pointed at the duplicate is repointed to `successor`, and the duplicate's file goes to the
    /// trash (or is removed when `delete` is set). A successor that is itself a replaced entry is
    /// rejected, so every replaced entry stays one hop from a live one.
    pub fn mark_duplicate(&self, successor: i64, duplicate: i64, delete: bool) -> Result<()> {
        if successor == duplicate {
            return Err(Error::Validation(format!(
                "entry {} cannot replace itself",
                successor
            )));
        }
        if let Some(merged) = self.replaced_entry(successor)? {
            return Err(Error::IntegrityViolation(format!(
                "entry {} was already merged into {}; it cannot be a successor",
                successor, merged.successor
            )));
        }
        self.entry(successor)?;
        let entry = self.entry(duplicate)?;
        if self.replaced_entry(duplicate)?.is_some() {
            return Err(Error::CorruptDatabase(format!(
                "key {} is both a library entry and a replaced entry",
                duplicate
            )));
        }

        let present = self.retire_file(&entry, delete)?;
        let former_name = entry.new_name.clone();
        let snapshot = ReplacedEntry {
            entry: LibraryEntry {
                present,
                trashed: true,
                ..entry
            },
            successor,
            former_name,
        };

        let tx = self.database().connection().unchecked_transaction()?;
        self.database().insert_replaced(&snapshot)?;
        self.database().reparent_replaced(duplicate, successor)?;
        self.database().delete_entry(duplicate)?;
        tx.commit()?;

        info!(
            "Merged entry {} ({}) into {}{}",
            duplicate,
            snapshot.former_name,
            successor,
            if delete { ", file deleted" } else { "" }
        );
        Ok(())
    }

    /// Move the entry's file to the trash or delete it. Returns whether a file remains.
    fn retire_file(&self, entry: &LibraryEntry, delete: bool) -> Result<bool> {
        remove_if_exists(&self.thumbnail_path(entry))?;
        let Some(current) = self.locate(entry) else {
            return Ok(false);
        };
        if delete {
            fs::remove_file(&current)?;
            return Ok(false);
        }
        let trashed = self.trash_path(&entry.new_name);
        if current != trashed {
            move_file(&current, &trashed)?;
        }
        Ok(true)
    }

    /// One-off repair: point every replaced entry at the live end of its chain.
    ///
    /// Entries whose chain loops or ends outside the library are left alone and logged.
    /// Returns the number of entries repointed.
    pub fn flatten_replaced_chains(&self) -> Result<usize> {
        let successors: HashMap<i64, i64> = self
            .replaced_entries()?
            .into_iter()
            .map(|r| (r.entry.key, r.successor))
            .collect();

        let tx = self.database().connection().unchecked_transaction()?;
        let mut fixed = 0;
        for (&key, &successor) in &successors {
            if !successors.contains_key(&successor) {
                continue;
            }

            let mut seen = HashSet::from([key]);
            let mut target = successor;
            let mut looped = false;
            while let Some(&next) = successors.get(&target) {
                if !seen.insert(target) {
                    looped = true;
                    break;
                }
                target = next;
            }
            if looped {
                warn!("Replaced entry {} is part of a successor loop", key);
                continue;
            }
            if self.find_entry(target)?.is_none() {
                warn!(
                    "Replaced entry {} leads to {}, which is not a library entry",
                    key, target
                );
                continue;
            }

            self.database().set_replaced_successor(key, target)?;
            fixed += 1;
        }
        tx.commit()?;
        info!("Flattened {} replaced-entry chains", fixed);
        Ok(fixed)
    }
}
