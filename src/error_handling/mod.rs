//! Error handling and processing statistics.
//!
//! This module provides:
//! - Typed errors for initialization, storage, transport, provider, probes and units
//! - Processing statistics tracking (error conditions and informational events)
//! - Transport error categorization and the health-check retry strategy

mod categorization;
mod stats;
mod types;

pub use categorization::{categorize_reqwest_error, health_check_retry_strategy};
pub use stats::{print_error_statistics, ProcessingStats};
pub use types::{
    DatabaseError, ErrorType, InfoType, InitializationError, ProbeError, ProviderError, ScanError,
    TransportError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_processing_stats_initialization() {
        let stats = ProcessingStats::new();
        for error_type in ErrorType::iter() {
            assert_eq!(stats.get_error_count(error_type), 0);
        }
        for info_type in InfoType::iter() {
            assert_eq!(stats.get_info_count(info_type), 0);
        }
    }

    #[test]
    fn test_processing_stats_totals() {
        let stats = ProcessingStats::new();
        stats.increment_error(ErrorType::ProviderOverloaded);
        stats.increment_error(ErrorType::ProviderOverloaded);
        stats.increment_error(ErrorType::ProxyMarkedDead);
        stats.increment_info(InfoType::RecordCreated);

        assert_eq!(stats.get_error_count(ErrorType::ProviderOverloaded), 2);
        assert_eq!(stats.total_errors(), 3);
        assert_eq!(stats.total_info(), 1);
    }

    #[test]
    fn test_proxy_failure_classification() {
        assert!(TransportError::Tls("handshake".into()).is_proxy_failure());
        assert!(TransportError::ProxyProtocol("tunnel".into()).is_proxy_failure());
        assert!(!TransportError::Timeout("slow".into()).is_proxy_failure());
        assert!(!TransportError::Connect("reset".into()).is_proxy_failure());
    }

    #[test]
    fn test_contract_error_has_no_transport() {
        let err = ProviderError::Contract("missing maxAssessments".into());
        assert!(err.transport().is_none());
        assert!(err.to_string().contains("maxAssessments"));
    }
}
