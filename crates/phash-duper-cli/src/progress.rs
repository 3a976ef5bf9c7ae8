use indicatif::{ProgressBar, ProgressStyle};
use phash_duper_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan phase: spinner (unknown total files upfront)
/// - Hash and index phases: progress bars
/// - Maintenance and auto-resolution: a spinner the caller starts, updated with running counts
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    pub fn spinner(&self, msg: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars(TICKS),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn counter(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(&format!(
                "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
                label
            ))
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars(TICKS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            f(pb);
        }
    }

    pub fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning for images...");
    }

    fn on_scan_progress(&self, files_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Scanning... {} images found", files_found)));
    }

    fn on_scan_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} images in {:.2}s",
            total_files, duration_secs
        );
    }

    fn on_hash_start(&self, total_files: usize) {
        self.counter("Hashing", total_files);
    }

    fn on_hash_progress(&self, files_hashed: usize, _total_files: usize) {
        self.with_bar(|pb| pb.set_position(files_hashed as u64));
    }

    fn on_hash_complete(&self, images_hashed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Hash complete: {} distinct images in {:.2}s",
            images_hashed, duration_secs
        );
    }

    fn on_index_start(&self, total_images: usize) {
        self.counter("Indexing", total_images);
    }

    fn on_index_progress(&self, images_indexed: usize, _total_images: usize) {
        self.with_bar(|pb| pb.set_position(images_indexed as u64));
    }

    fn on_index_complete(&self, images_indexed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Index write complete: {} images in {:.2}s",
            images_indexed, duration_secs
        );
    }

    fn on_rebalance_progress(&self, branches_rebuilt: usize, nodes_rebuilt: usize) {
        self.with_bar(|pb| {
            pb.set_message(format!(
                "Rebalancing... {} branches, {} nodes",
                branches_rebuilt, nodes_rebuilt
            ))
        });
    }

    fn on_discovery_progress(&self, files_searched: usize, pairs_added: usize) {
        self.with_bar(|pb| {
            pb.set_message(format!(
                "Searching... {} files, {} new pairs",
                files_searched, pairs_added
            ))
        });
    }

    fn on_auto_resolution_progress(&self, rule: &str, pairs_searched: usize, pairs_actioned: usize) {
        self.with_bar(|pb| {
            if pairs_actioned > 0 {
                pb.set_message(format!("{}: {} pairs actioned", rule, pairs_actioned));
            } else {
                pb.set_message(format!("{}: {} pairs searched", rule, pairs_searched));
            }
        });
    }
}
