use indicatif::{ProgressBar, ProgressStyle};
use shoebox_core::{ProgressReporter, SearchEvent};
use std::sync::mpsc::Receiver;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn bar_style(label: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "  {{spinner:.cyan}} {label} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{wide_msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸─")
    .tick_chars(TICKS)
}

/// CLI progress reporter using indicatif progress bars.
///
/// - Staging: one tick per file sent to the metadata extractor
/// - Matching and commit: one tick per staged row
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start_bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(bar_style(label));
        pb.enable_steady_tick(Duration::from_millis(80));
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_stage_start(&self, total_files: usize) {
        self.start_bar("Extracting", total_files);
    }

    fn on_stage_progress(&self, files_done: usize, current_path: &str) {
        self.with_bar(|pb| {
            pb.set_position(files_done as u64);
            pb.set_message(current_path.to_string());
        });
    }

    fn on_stage_complete(&self, extracted: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Staging complete: {} files extracted in {:.2}s",
            extracted, duration_secs
        );
    }

    fn on_match_start(&self, total_rows: usize) {
        self.start_bar("Matching", total_rows);
    }

    fn on_match_progress(&self, rows_done: usize) {
        self.with_bar(|pb| pb.set_position(rows_done as u64));
    }

    fn on_match_complete(&self, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Matching complete in {:.2}s",
            duration_secs
        );
    }

    fn on_commit_start(&self, total_rows: usize) {
        self.start_bar("Importing", total_rows);
    }

    fn on_commit_progress(&self, rows_done: usize) {
        self.with_bar(|pb| pb.set_position(rows_done as u64));
    }

    fn on_commit_complete(&self, imported: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Import complete: {} files in {:.2}s",
            imported, duration_secs
        );
    }
}

/// Render a search event stream until `Done` or until the sender goes away.
pub fn follow_search(events: &Receiver<SearchEvent>) {
    let pb = ProgressBar::new(0);
    pb.set_style(bar_style("Searching"));
    pb.enable_steady_tick(Duration::from_millis(80));

    for event in events.iter() {
        match event {
            SearchEvent::Max(total) => pb.set_length(total as u64),
            SearchEvent::Current(done) => pb.set_position(done as u64),
            SearchEvent::Message(msg) => pb.println(format!("  {}", msg)),
            SearchEvent::Done => break,
        }
    }
    pb.finish_and_clear();
}
