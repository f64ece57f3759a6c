use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Trait for reporting progress of long-running library operations.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_stage_start(&self, _total_files: usize) {}
    fn on_stage_progress(&self, _files_done: usize, _current_path: &str) {}
    fn on_stage_complete(&self, _extracted: usize, _duration_secs: f64) {}
    fn on_match_start(&self, _total_rows: usize) {}
    fn on_match_progress(&self, _rows_done: usize) {}
    fn on_match_complete(&self, _duration_secs: f64) {}
    fn on_commit_start(&self, _total_rows: usize) {}
    fn on_commit_progress(&self, _rows_done: usize) {}
    fn on_commit_complete(&self, _imported: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Cooperative cancellation flag shared between a controller and a worker.
///
/// Workers only poll it between units of work (one file, one partition).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
