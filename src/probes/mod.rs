//! Local scanners.
//!
//! Families that do not go through the remote provider are probed directly
//! from the worker. Every probe returns a JSON document in the shape the
//! family's analyzer expects.

mod dns;
mod ftp;
mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use serde_json::Value;

use crate::config::PROBE_TIMEOUT_SECS;
use crate::error_handling::{InitializationError, ProbeError};
use crate::initialization::{init_probe_client, init_resolver};
use crate::models::{ScanFamily, Target};

/// Produces raw output for a local scan family.
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn probe(&self, family: ScanFamily, target: &Target) -> Result<Value, ProbeError>;
}

/// Probes targets over the network.
pub struct NetworkProbe {
    resolver: Arc<TokioAsyncResolver>,
    http: reqwest::Client,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(resolver: Arc<TokioAsyncResolver>, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            resolver,
            http,
            timeout,
        }
    }

    /// Builds a probe with the default resolver and probe client.
    pub fn from_defaults(user_agent: &str) -> Result<Self, InitializationError> {
        Ok(Self::new(
            init_resolver()?,
            init_probe_client(PROBE_TIMEOUT_SECS, user_agent)?,
            Duration::from_secs(PROBE_TIMEOUT_SECS),
        ))
    }
}

#[async_trait]
impl TargetProbe for NetworkProbe {
    async fn probe(&self, family: ScanFamily, target: &Target) -> Result<Value, ProbeError> {
        match family {
            ScanFamily::Ftp => ftp::probe(target, self.timeout).await,
            ScanFamily::HttpHeaders => http::probe(&self.http, target).await,
            ScanFamily::Dns => dns::probe_resolvable(&self.resolver, target).await,
            ScanFamily::Mail => dns::probe_mail(&self.resolver, target).await,
            ScanFamily::TlsQualys => Err(ProbeError::Failed(format!(
                "{family} is scanned through the remote provider"
            ))),
        }
    }
}

/// `(port, scheme)` of an endpoint target, or an error for url targets.
pub(crate) fn endpoint_of(target: &Target) -> Result<(u16, &str), ProbeError> {
    target
        .endpoint
        .as_ref()
        .map(|e| (e.port, e.protocol.as_str()))
        .ok_or_else(|| ProbeError::Failed(format!("{} is not an endpoint", target.address())))
}
