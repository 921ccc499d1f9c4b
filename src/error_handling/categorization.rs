//! Error categorization and retry strategy.
//!
//! This module maps `reqwest` failures onto `TransportError` and configures the
//! bounded retry strategy used by proxy health checks.

use std::error::Error as StdError;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;

use super::types::TransportError;

/// Creates the bounded fixed-delay retry strategy for health checks.
///
/// `attempts` counts the initial attempt, so the iterator yields
/// `attempts - 1` delays.
pub fn health_check_retry_strategy(
    delay: Duration,
    attempts: usize,
) -> impl Iterator<Item = Duration> {
    FixedInterval::new(delay).take(attempts.saturating_sub(1))
}

/// Categorizes a `reqwest::Error` into a `TransportError`.
///
/// reqwest does not expose TLS or proxy handshake failures as distinct kinds,
/// so the source chain is inspected for them before falling back to the
/// error's own classification.
pub fn categorize_reqwest_error(error: &reqwest::Error) -> TransportError {
    let chain = error_chain_text(error);

    if mentions_tls(&chain) {
        return TransportError::Tls(chain);
    }
    if mentions_proxy_protocol(&chain) {
        return TransportError::ProxyProtocol(chain);
    }

    if error.is_timeout() {
        TransportError::Timeout(chain)
    } else if error.is_connect() {
        TransportError::Connect(chain)
    } else if error.is_body() || error.is_decode() {
        TransportError::Body(chain)
    } else {
        TransportError::Other(chain)
    }
}

fn error_chain_text(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn mentions_tls(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["ssl", "tls", "certificate", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn mentions_proxy_protocol(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("proxy") && (lower.contains("tunnel") || lower.contains("authentication"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_retry_strategy_is_bounded() {
        let delays: Vec<Duration> =
            health_check_retry_strategy(Duration::from_millis(10), 3).collect();
        assert_eq!(delays, vec![Duration::from_millis(10); 2]);

        assert_eq!(
            health_check_retry_strategy(Duration::from_millis(10), 1).count(),
            0
        );
        assert_eq!(
            health_check_retry_strategy(Duration::from_millis(10), 0).count(),
            0
        );
    }

    #[test]
    fn test_tls_detection_in_messages() {
        assert!(mentions_tls("error trying to connect: SSL handshake failed"));
        assert!(mentions_tls("invalid peer certificate: UnknownIssuer"));
        assert!(!mentions_tls("connection refused"));
    }

    #[test]
    fn test_proxy_protocol_detection_in_messages() {
        assert!(mentions_proxy_protocol("unsuccessful tunnel through proxy"));
        assert!(mentions_proxy_protocol("proxy authentication required"));
        assert!(!mentions_proxy_protocol("connection refused"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        // Nothing listens on port 1 on the loopback interface.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let err = client
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .expect_err("port 1 should refuse connections");
        let categorized = categorize_reqwest_error(&err);
        assert!(
            matches!(categorized, TransportError::Connect(_)),
            "unexpected category: {categorized:?}"
        );
        assert!(!categorized.is_proxy_failure());
    }
}
