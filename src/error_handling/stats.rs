//! Processing statistics tracking.
//!
//! Lock-free counters for error conditions and informational events observed
//! while units run. Shared across tasks via `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::info;
use strum::IntoEnumIterator;

use super::types::{ErrorType, InfoType};

/// One counter per `ErrorType` and per `InfoType`, indexed by discriminant.
#[derive(Debug)]
pub struct ProcessingStats {
    errors: Vec<AtomicUsize>,
    info: Vec<AtomicUsize>,
}

fn counters(len: usize) -> Vec<AtomicUsize> {
    (0..len).map(|_| AtomicUsize::new(0)).collect()
}

impl ProcessingStats {
    pub fn new() -> Self {
        ProcessingStats {
            errors: counters(ErrorType::iter().count()),
            info: counters(InfoType::iter().count()),
        }
    }

    pub fn increment_error(&self, error: ErrorType) {
        self.errors[error as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_info(&self, info_type: InfoType) {
        self.info[info_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_error_count(&self, error: ErrorType) -> usize {
        self.errors[error as usize].load(Ordering::SeqCst)
    }

    pub fn get_info_count(&self, info_type: InfoType) -> usize {
        self.info[info_type as usize].load(Ordering::SeqCst)
    }

    pub fn total_errors(&self) -> usize {
        self.errors.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn total_info(&self) -> usize {
        self.info.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Non-zero error counters, in declaration order.
    pub fn error_snapshot(&self) -> Vec<(ErrorType, usize)> {
        ErrorType::iter()
            .map(|e| (e, self.get_error_count(e)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Non-zero event counters, in declaration order.
    pub fn info_snapshot(&self) -> Vec<(InfoType, usize)> {
        InfoType::iter()
            .map(|i| (i, self.get_info_count(i)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every non-zero counter at the end of a run, errors first.
pub fn print_error_statistics(stats: &ProcessingStats) {
    let errors = stats.error_snapshot();
    if !errors.is_empty() {
        info!("Errors and retries ({} total):", stats.total_errors());
        for (error_type, count) in errors {
            info!("   {error_type}: {count}");
        }
    }
    let events = stats.info_snapshot();
    if !events.is_empty() {
        info!("Events:");
        for (info_type, count) in events {
            info!("   {info_type}: {count}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_skips_zero_counters() {
        let stats = ProcessingStats::new();
        stats.increment_error(ErrorType::StoreError);
        stats.increment_error(ErrorType::ProxyBusy);
        stats.increment_error(ErrorType::ProxyBusy);
        stats.increment_info(InfoType::ProxyClaimed);

        assert_eq!(
            stats.error_snapshot(),
            vec![(ErrorType::ProxyBusy, 2), (ErrorType::StoreError, 1)]
        );
        assert_eq!(stats.info_snapshot(), vec![(InfoType::ProxyClaimed, 1)]);
    }

    #[test]
    fn test_counters_are_independent() {
        let stats = ProcessingStats::new();
        stats.increment_error(ErrorType::UnitPanicked);
        assert_eq!(stats.get_error_count(ErrorType::UnitPanicked), 1);
        assert_eq!(stats.get_error_count(ErrorType::UnitFailed), 0);
        assert_eq!(stats.total_info(), 0);
    }
}
