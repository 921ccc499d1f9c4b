// storage/mod.rs
// Database operations module

pub mod migrations;
pub mod pool;
pub mod proxies;
pub mod scans;
pub mod scratchpad;
pub mod targets;

#[cfg(test)]
pub mod test_helpers;

// Re-export commonly used items
pub use migrations::run_migrations;
pub use pool::init_db_pool_with_path;
pub use scans::{add_scan, had_scan_with_points, latest_scan, AddScanOutcome, ScanRecord};
