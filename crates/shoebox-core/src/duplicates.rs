use crate::error::{Error, Result};
use crate::library::Library;
use crate::search::SearchOutcome;
use crate::storage::models::DuplicateCluster;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info};

/// Registry tag of clusters found by the exact-hash pass.
pub const HASH_TAG: &str = "hash";

impl Library {
    pub fn duplicate_clusters(&self) -> Result<Vec<DuplicateCluster>> {
        Ok(self.database().duplicate_clusters()?)
    }

    pub fn clear_duplicates(&self) -> Result<usize> {
        let removed = self.database().clear_duplicates()?;
        info!("Cleared {} duplicate clusters", removed);
        Ok(removed)
    }

    pub fn ensure_registry_empty(&self) -> Result<()> {
        match self.database().duplicate_count()? {
            0 => Ok(()),
            n => Err(Error::RegistryNotEmpty(n)),
        }
    }

    /// Group every present entry by content hash and register each group of two or more.
    pub fn find_hash_duplicates(&self) -> Result<usize> {
        self.ensure_registry_empty()?;

        let mut groups: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for entry in self.entries()?.into_iter().filter(|e| e.present) {
            groups.entry(entry.content_hash).or_default().push(entry.key);
        }

        let tx = self.database().connection().unchecked_transaction()?;
        let mut stored = 0;
        for keys in groups.values().filter(|keys| keys.len() > 1) {
            self.database().insert_duplicate_cluster(HASH_TAG, keys)?;
            stored += 1;
        }
        tx.commit()?;
        info!("Exact-hash pass registered {} clusters", stored);
        Ok(stored)
    }

    /// Translate a similarity search's paths back to entry keys and register the groups.
    ///
    /// Paths that are not an active entry's file are dropped; groups left with fewer than two
    /// keys are not stored.
    pub fn store_search_outcome(&self, outcome: &SearchOutcome) -> Result<usize> {
        self.ensure_registry_empty()?;

        let by_path: HashMap<PathBuf, i64> = self
            .entries()?
            .into_iter()
            .filter(|e| !e.trashed)
            .map(|e| (self.tree_path(&e.new_name, &e.datetime), e.key))
            .collect();

        let tx = self.database().connection().unchecked_transaction()?;
        let mut stored = 0;
        for result in &outcome.results {
            for group in result.report.clusters.values() {
                let mut keys = Vec::new();
                for path in group.paths() {
                    match by_path.get(path) {
                        Some(key) if !keys.contains(key) => keys.push(*key),
                        Some(_) => {}
                        None => debug!("{} is not a library entry", path.display()),
                    }
                }
                if keys.len() > 1 {
                    self.database()
                        .insert_duplicate_cluster(outcome.granularity.tag(), &keys)?;
                    stored += 1;
                }
            }
        }
        tx.commit()?;
        info!(
            "Registered {} clusters from {} search{}",
            stored,
            outcome.granularity,
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        Ok(stored)
    }

    /// Remove one cluster from the registry and return it.
    pub fn take_cluster(&self, key: i64) -> Result<DuplicateCluster> {
        let cluster = self
            .duplicate_clusters()?
            .into_iter()
            .find(|c| c.key == key)
            .ok_or_else(|| Error::Validation(format!("no duplicate cluster {}", key)))?;
        self.database().delete_duplicate_cluster(key)?;
        Ok(cluster)
    }

    /// Merge every other member of a cluster into `successor`, then drop the cluster.
    ///
    /// Members that are no longer live entries are skipped. Returns the number merged.
    pub fn resolve_cluster(&self, cluster_key: i64, successor: i64, delete: bool) -> Result<usize> {
        let cluster = self
            .duplicate_clusters()?
            .into_iter()
            .find(|c| c.key == cluster_key)
            .ok_or_else(|| Error::Validation(format!("no duplicate cluster {}", cluster_key)))?;
        if !cluster.matched_keys.contains(&successor) {
            return Err(Error::Validation(format!(
                "entry {} is not a member of cluster {}",
                successor, cluster_key
            )));
        }

        let mut merged = 0;
        for &duplicate in cluster.matched_keys.iter().filter(|&&k| k != successor) {
            if self.find_entry(duplicate)?.is_none() {
                debug!("Cluster member {} is no longer in the library", duplicate);
                continue;
            }
            self.mark_duplicate(successor, duplicate, delete)?;
            merged += 1;
        }
        self.take_cluster(cluster_key)?;
        info!(
            "Resolved cluster {}: {} entries merged into {}",
            cluster_key, merged, successor
        );
        Ok(merged)
    }
}
