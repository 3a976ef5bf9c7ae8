/// Trait for reporting progress of ingest and maintenance work.
///
/// The CLI implements it with indicatif bars. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_hash_start(&self, _total_files: usize) {}
    fn on_hash_progress(&self, _files_hashed: usize, _total_files: usize) {}
    fn on_hash_complete(&self, _images_hashed: usize, _duration_secs: f64) {}
    fn on_index_start(&self, _total_images: usize) {}
    fn on_index_progress(&self, _images_indexed: usize, _total_images: usize) {}
    fn on_index_complete(&self, _images_indexed: usize, _duration_secs: f64) {}
    fn on_rebalance_progress(&self, _branches_rebuilt: usize, _nodes_rebuilt: usize) {}
    fn on_discovery_progress(&self, _files_searched: usize, _pairs_added: usize) {}
    fn on_auto_resolution_progress(&self, _rule: &str, _pairs_searched: usize, _pairs_actioned: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
