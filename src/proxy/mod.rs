//! Proxy Pool Manager.
//!
//! Proxies are rows in the `proxy` table. Claiming is a database-level
//! compare-and-set followed by a live health check through the proxy
//! (claim-then-verify), so two workers, in this process or another, can never
//! hold the same proxy.

mod health;
mod pool;

use std::fmt;

use crate::provider::CapacitySnapshot;

pub use health::ProxyHealth;
pub use pool::ProxyPool;

/// An egress proxy as stored in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub id: i64,
    /// `host:port`, or a full proxy url
    pub address: String,
    /// Scheme used when the address has none
    pub protocol: String,
    pub is_dead: bool,
    pub is_dead_reason: Option<String>,
    pub manually_disabled: bool,
    pub currently_in_use: bool,
    /// Alive but last seen without provider capacity; skipped when claiming
    pub out_of_capacity: bool,
    pub request_speed_ms: Option<i64>,
    pub capacity: Option<CapacitySnapshot>,
    pub check_result: Option<String>,
    pub check_result_at_ms: Option<i64>,
}

impl Proxy {
    /// Proxy url handed to the HTTP client.
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("{}://{}", self.protocol, self.address)
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: i64, address: &str) -> Self {
        Proxy {
            id,
            address: address.to_string(),
            protocol: "http".to_string(),
            is_dead: false,
            is_dead_reason: None,
            manually_disabled: false,
            currently_in_use: false,
            out_of_capacity: false,
            request_speed_ms: None,
            capacity: None,
            check_result: None,
            check_result_at_ms: None,
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy #{} ({})", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_adds_scheme_when_missing() {
        let proxy = Proxy::for_test(1, "10.0.0.1:3128");
        assert_eq!(proxy.url(), "http://10.0.0.1:3128");

        let explicit = Proxy {
            address: "socks5://10.0.0.2:1080".to_string(),
            ..proxy
        };
        assert_eq!(explicit.url(), "socks5://10.0.0.2:1080");
        assert_eq!(explicit.to_string(), "proxy #1 (socks5://10.0.0.2:1080)");
    }
}
