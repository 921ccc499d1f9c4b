//! Live proxy health checks.

use std::time::Duration;

use log::{error, info, warn};
use sqlx::SqlitePool;
use tokio_retry::RetryIf;

use crate::config::Pacing;
use crate::error_handling::{
    health_check_retry_strategy, ErrorType, ProcessingStats, ProviderError, ScanError,
};
use crate::provider::{CapacitySnapshot, ScanProvider};
use crate::storage::proxies;
use crate::utils::duration_to_ms;

use super::Proxy;

/// Result of a live check through a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyHealth {
    /// Reachable with enough provider capacity.
    Healthy {
        latency: Duration,
        capacity: CapacitySnapshot,
    },
    /// Reachable, but the provider has no room for this client right now.
    /// `capacity` is absent when the provider answered with an overload error.
    Busy { capacity: Option<CapacitySnapshot> },
    /// Unusable; the proxy has been marked dead.
    Dead { reason: String },
}

impl ProxyHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, ProxyHealth::Healthy { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, ProxyHealth::Dead { .. })
    }
}

/// One attempt: capacity endpoint, then content fetch.
async fn probe_once(
    provider: &dyn ScanProvider,
    proxy: &Proxy,
) -> Result<(CapacitySnapshot, Duration), ProviderError> {
    let capacity = provider.capacity(proxy).await?;
    let latency = provider.fetch_content(proxy).await?;
    Ok((capacity, latency))
}

/// Retries plain network failures. TLS/proxy-protocol failures, overload
/// answers and contract errors are final on the first attempt.
fn is_retryable(error: &ProviderError) -> bool {
    error
        .transport()
        .is_some_and(|transport| !transport.is_proxy_failure())
}

/// Checks `proxy` through `provider` and records the outcome on its row.
///
/// Transport failures mark the proxy dead and come back as
/// `ProxyHealth::Dead`. An overloaded provider means the proxy works, so it
/// comes back as `ProxyHealth::Busy`. Only contract violations and database
/// errors are `Err`.
pub(crate) async fn check_health(
    pool: &SqlitePool,
    provider: &dyn ScanProvider,
    pacing: &Pacing,
    stats: &ProcessingStats,
    proxy: &Proxy,
) -> Result<ProxyHealth, ScanError> {
    let strategy =
        health_check_retry_strategy(pacing.health_check_retry_delay, pacing.health_check_attempts);
    let result = RetryIf::start(strategy, || probe_once(provider, proxy), is_retryable).await;

    match result {
        Ok((capacity, latency)) => {
            let busy = capacity.is_exhausted();
            let check_result = if busy { "busy" } else { "ok" };
            proxies::record_alive(
                pool,
                proxy.id,
                check_result,
                Some(duration_to_ms(latency)),
                Some(&capacity),
                busy,
            )
            .await?;
            if busy {
                stats.increment_error(ErrorType::ProxyBusy);
                info!(
                    "{proxy} alive but busy: max {}, current {}, client max {}",
                    capacity.max, capacity.current, capacity.this_client
                );
                Ok(ProxyHealth::Busy {
                    capacity: Some(capacity),
                })
            } else {
                info!("{proxy} healthy in {} ms", latency.as_millis());
                Ok(ProxyHealth::Healthy { latency, capacity })
            }
        }
        Err(ProviderError::Overloaded(reason)) => {
            proxies::record_alive(pool, proxy.id, "overloaded", None, None, true).await?;
            stats.increment_error(ErrorType::ProxyBusy);
            info!("{proxy} alive but the provider is overloaded: {reason}");
            Ok(ProxyHealth::Busy { capacity: None })
        }
        Err(ProviderError::Transport(transport)) => {
            let reason = transport.to_string();
            warn!("{proxy} failed its health check, marking dead: {reason}");
            proxies::mark_dead(pool, proxy.id, &reason).await?;
            stats.increment_error(ErrorType::ProxyMarkedDead);
            Ok(ProxyHealth::Dead { reason })
        }
        Err(contract @ ProviderError::Contract(_)) => {
            error!("Health check through {proxy} hit a contract violation: {contract}");
            stats.increment_error(ErrorType::ProviderContractError);
            Err(contract.into())
        }
    }
}
