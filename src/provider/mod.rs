//! Remote scan provider.
//!
//! The orchestration core talks to the provider only through [`ScanProvider`].
//! [`SslLabsClient`] implements it over HTTP; tests substitute scripted fakes.

mod classify;
mod ssllabs;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{MAX_CURRENT_ASSESSMENTS, MIN_PROVIDER_CAPACITY};
use crate::error_handling::ProviderError;
use crate::models::Target;
use crate::proxy::Proxy;

pub use classify::{classify, interpret_info, parse_capacity, PollOutcome};
pub use ssllabs::SslLabsClient;

/// Remote capacity counters as reported through one proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// Assessments the provider allows in total
    pub max: i64,
    /// Assessments currently running for this client
    pub current: i64,
    /// Assessments allowed for this client specifically
    pub this_client: i64,
}

impl CapacitySnapshot {
    /// A proxy whose capacity is this low is alive but not worth claiming.
    pub fn is_exhausted(&self) -> bool {
        self.max < MIN_PROVIDER_CAPACITY
            || self.this_client < MIN_PROVIDER_CAPACITY
            || self.current > MAX_CURRENT_ASSESSMENTS
    }

    /// Whether one more registration fits right now.
    pub fn has_room(&self) -> bool {
        self.current < self.max.min(self.this_client)
    }
}

/// A provider answer, kept raw for the scratchpad.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub http_status: u16,
    pub body: serde_json::Value,
    pub raw: String,
}

impl ProviderResponse {
    /// Builds a response from a status code and a body. Non-JSON bodies become `Null`.
    pub fn new(http_status: u16, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let body = serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
        Self {
            http_status,
            body,
            raw,
        }
    }

    pub fn outcome(&self) -> PollOutcome {
        classify(self.http_status, &self.body)
    }
}

/// Operations the orchestration core needs from the remote provider.
///
/// Every call goes out through the given proxy.
#[async_trait]
pub trait ScanProvider: Send + Sync {
    /// Capacity counters (health-check endpoint).
    async fn capacity(&self, proxy: &Proxy) -> Result<CapacitySnapshot, ProviderError>;

    /// Fetches a content page and returns how long it took.
    async fn fetch_content(&self, proxy: &Proxy) -> Result<Duration, ProviderError>;

    /// Registers a new scan of `target`.
    async fn register(
        &self,
        proxy: &Proxy,
        target: &Target,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Fetches the current status of the scan of `target`.
    async fn poll(&self, proxy: &Proxy, target: &Target) -> Result<ProviderResponse, ProviderError>;
}
