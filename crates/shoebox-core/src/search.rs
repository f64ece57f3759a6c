use crate::error::{Error, Result};
use crate::library::{Library, CATALOG_NAME};
use crate::progress::CancellationToken;
use crate::similarity::{SimilarityEngine, SimilarityReport};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// How the library tree is cut into directories for the similarity engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Library,
    Year,
    Month,
    Day,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Library,
        Granularity::Year,
        Granularity::Month,
        Granularity::Day,
    ];

    /// Registry tag for clusters found at this granularity.
    pub fn tag(self) -> &'static str {
        match self {
            Granularity::Library => "library",
            Granularity::Year => "year",
            Granularity::Month => "month",
            Granularity::Day => "day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.tag().eq_ignore_ascii_case(s.trim()))
    }

    fn depth(self) -> usize {
        match self {
            Granularity::Library => 0,
            Granularity::Year => 1,
            Granularity::Month => 2,
            Granularity::Day => 3,
        }
    }

    /// The datetime-tree directories to search, sorted.
    pub fn partitions(self, root: &Path) -> Result<Vec<PathBuf>> {
        if self == Granularity::Library {
            return Ok(vec![root.to_path_buf()]);
        }
        let mut dirs = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.depth())
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir() && is_date_component(e.file_name()));
        for entry in walker {
            let entry = entry?;
            if entry.depth() == self.depth() {
                dirs.push(entry.into_path());
            }
        }
        Ok(dirs)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn is_date_component(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

/// Progress stream of a similarity search. `Done` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    /// Number of partitions to process.
    Max(usize),
    /// Partitions completed so far.
    Current(usize),
    Message(String),
    Done,
}

/// Everything a search worker needs; holds no catalog state.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub granularity: Granularity,
    pub partitions: Vec<PathBuf>,
    pub ignore: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PartitionResult {
    pub partition: PathBuf,
    pub report: SimilarityReport,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub granularity: Granularity,
    pub results: Vec<PartitionResult>,
    pub cancelled: bool,
}

fn emit(events: &Sender<SearchEvent>, event: SearchEvent) {
    if events.send(event).is_err() {
        debug!("Search event dropped; receiver is gone");
    }
}

/// Run a plan to completion or cancellation on the calling thread.
///
/// Emits `Max`, one `Current` per finished partition, and `Done`. The token is checked before
/// each partition only. A partition the engine fails on is reported as a `Message` and skipped.
pub fn run_search(
    plan: &SearchPlan,
    engine: &dyn SimilarityEngine,
    events: &Sender<SearchEvent>,
    cancel: &CancellationToken,
) -> SearchOutcome {
    let mut outcome = SearchOutcome {
        granularity: plan.granularity,
        results: Vec::with_capacity(plan.partitions.len()),
        cancelled: false,
    };
    emit(events, SearchEvent::Max(plan.partitions.len()));

    for (done, partition) in plan.partitions.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Similarity search cancelled after {} partitions", done);
            emit(events, SearchEvent::Message("Search cancelled".to_string()));
            outcome.cancelled = true;
            break;
        }

        if let Some(scratch) = engine.scratch_file(partition) {
            match fs::remove_file(&scratch) {
                Ok(()) => debug!("Removed scratch file {}", scratch.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cannot remove {}: {}", scratch.display(), e),
            }
        }

        match engine.search(partition, &plan.ignore) {
            Ok(report) => {
                if !report.clusters.is_empty() {
                    emit(
                        events,
                        SearchEvent::Message(format!(
                            "{}: {} groups",
                            partition.display(),
                            report.clusters.len()
                        )),
                    );
                }
                outcome.results.push(PartitionResult {
                    partition: partition.clone(),
                    report,
                });
            }
            Err(e) => {
                error!("Similarity search failed in {}: {}", partition.display(), e);
                emit(
                    events,
                    SearchEvent::Message(format!("{}: {}", partition.display(), e)),
                );
            }
        }
        emit(events, SearchEvent::Current(done + 1));
    }

    emit(events, SearchEvent::Done);
    outcome
}

/// A search running on a worker thread.
pub struct SearchHandle {
    events: Receiver<SearchEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<SearchOutcome>,
}

impl SearchHandle {
    pub fn events(&self) -> &Receiver<SearchEvent> {
        &self.events
    }

    /// Ask the worker to stop before its next partition.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<SearchOutcome> {
        self.worker
            .join()
            .map_err(|_| Error::Other("similarity search worker panicked".to_string()))
    }
}

/// Start `plan` on a dedicated thread and return immediately.
///
/// The worker is a thread in the calling process, not a child process. A panic inside the engine
/// surfaces as an error from [`SearchHandle::join`]; an abort in engine code (stack overflow,
/// `panic = "abort"`, a crashing native library) takes the whole process down with it.
pub fn spawn_search(plan: SearchPlan, engine: Arc<dyn SimilarityEngine>) -> Result<SearchHandle> {
    spawn_search_with_token(plan, engine, CancellationToken::new())
}

pub fn spawn_search_with_token(
    plan: SearchPlan,
    engine: Arc<dyn SimilarityEngine>,
    cancel: CancellationToken,
) -> Result<SearchHandle> {
    let (tx, rx) = mpsc::channel();
    let token = cancel.clone();
    let worker = thread::Builder::new()
        .name("shoebox-search".to_string())
        .spawn(move || run_search(&plan, engine.as_ref(), &tx, &token))?;
    Ok(SearchHandle {
        events: rx,
        cancel,
        worker,
    })
}

impl Library {
    /// Build a search plan over this library's tree. Refuses to plan while clusters are pending.
    pub fn plan_similarity_search(&self, granularity: Granularity) -> Result<SearchPlan> {
        self.ensure_registry_empty()?;
        let partitions = granularity.partitions(self.root())?;
        let catalog = self.root().join(CATALOG_NAME);
        let ignore = vec![
            self.trash_dir(),
            self.thumbnail_dir(),
            catalog.with_file_name(format!("{CATALOG_NAME}-wal")),
            catalog.with_file_name(format!("{CATALOG_NAME}-shm")),
            catalog,
        ];
        info!(
            "Planned {} search over {} partitions",
            granularity,
            partitions.len()
        );
        Ok(SearchPlan {
            granularity,
            partitions,
            ignore,
        })
    }

    /// Plan, run in-process and store the result. Returns the number of clusters stored.
    ///
    /// Partitions finished before a cancellation are still stored.
    pub fn find_similar_duplicates(
        &self,
        granularity: Granularity,
        engine: &dyn SimilarityEngine,
        events: &Sender<SearchEvent>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let plan = self.plan_similarity_search(granularity)?;
        let outcome = run_search(&plan, engine, events, cancel);
        self.store_search_outcome(&outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_granularity_tags_round_trip() {
        for g in Granularity::ALL {
            assert_eq!(Granularity::parse(g.tag()), Some(g));
        }
        assert_eq!(Granularity::parse("MONTH"), Some(Granularity::Month));
        assert_eq!(Granularity::parse("week"), None);
    }

    #[test]
    fn test_partitions_follow_date_tree() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        for dir in ["2023/12/31", "2024/01/01", "2024/01/02", "2024/02/10"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::create_dir_all(root.join("misc/05")).unwrap();

        assert_eq!(
            Granularity::Library.partitions(root).unwrap(),
            vec![root.to_path_buf()]
        );
        assert_eq!(
            Granularity::Year.partitions(root).unwrap(),
            vec![root.join("2023"), root.join("2024")]
        );
        assert_eq!(
            Granularity::Month.partitions(root).unwrap(),
            vec![root.join("2023/12"), root.join("2024/01"), root.join("2024/02")]
        );
        assert_eq!(Granularity::Day.partitions(root).unwrap().len(), 4);
    }
}
