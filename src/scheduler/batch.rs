//! Provider batch pipeline: claim, register sequentially, poll, release.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use sqlx::SqlitePool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Pacing;
use crate::error_handling::{
    ErrorType, InfoType, ProcessingStats, ProviderError, ScanError, TransportError,
};
use crate::models::{ScanFamily, Target};
use crate::polling::{Observed, Poller, ScanRequest};
use crate::provider::{ProviderResponse, ScanProvider};
use crate::proxy::Proxy;
use crate::utils::sleep_or_cancel;

use super::{store_analyses, ScanContext, UnitFailure, UnitReport, WorkUnit};

/// Runs one provider-backed unit under a single proxy claim.
///
/// The claimed proxy is always released, also when the batch fails or
/// panics. A proxy that fails mid-batch is replaced; polls already running
/// on it carry on. When registration fails, the scans already registered are
/// still polled and stored before the failure is returned.
pub(crate) async fn run_provider_batch(
    ctx: &ScanContext,
    unit: &WorkUnit,
) -> Result<UnitReport, UnitFailure> {
    let size = unit.targets.len();
    if let Some(limiter) = &ctx.claim_limiter {
        if !limiter.acquire_or_cancel(&ctx.cancel).await {
            return Ok(abandon_all(unit));
        }
    }

    let mut proxy = match ctx.proxies.claim(&ctx.cancel).await {
        Ok(proxy) => proxy,
        Err(ScanError::Cancelled) => return Ok(abandon_all(unit)),
        Err(e) => return Err(UnitFailure::new(UnitReport::default(), size, e)),
    };

    let outcome = AssertUnwindSafe(register_and_collect(ctx, unit, &mut proxy))
        .catch_unwind()
        .await;

    if let Err(e) = ctx.proxies.release(&proxy).await {
        error!("Could not release {proxy}: {e}");
    }

    match outcome {
        Ok((report, None)) => Ok(report),
        Ok((report, Some(error))) => Err(UnitFailure::new(report, size, error)),
        Err(panic) => Err(UnitFailure::new(
            UnitReport::default(),
            size,
            ScanError::Panicked(panic_message(&panic)),
        )),
    }
}

fn abandon_all(unit: &WorkUnit) -> UnitReport {
    UnitReport {
        abandoned: unit.targets.len(),
        ..Default::default()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Everything a poll task needs, owned so it can move into the task.
#[derive(Clone)]
struct PollShared {
    provider: Arc<dyn ScanProvider>,
    pool: Arc<SqlitePool>,
    stats: Arc<ProcessingStats>,
    family: ScanFamily,
    cancel: CancellationToken,
}

impl PollShared {
    /// Polls a registered request to its end, then analyzes and stores the result.
    async fn finish(self, mut request: ScanRequest, first: Observed) -> Result<UnitReport, ScanError> {
        let response = match first {
            Observed::Terminal(response) => response,
            Observed::Wait(wait) => {
                let poller = Poller::new(
                    self.provider.as_ref(),
                    &self.pool,
                    &self.stats,
                    self.family,
                );
                poller
                    .poll_until_terminal(&mut request, wait, &self.cancel)
                    .await?
            }
        };
        let analyses = self.family.analyze(&response.body);
        Ok(store_analyses(&self.pool, &self.stats, &request.target, &analyses).await?)
    }
}

/// Registers the unit's targets one by one and collects every poll.
///
/// The first registration error stops further registrations. It is returned
/// next to the report once the polls already spawned have finished.
async fn register_and_collect(
    ctx: &ScanContext,
    unit: &WorkUnit,
    proxy: &mut Proxy,
) -> (UnitReport, Option<ScanError>) {
    let shared = PollShared {
        provider: Arc::clone(ctx.provider()),
        pool: Arc::clone(&ctx.pool),
        stats: Arc::clone(&ctx.stats),
        family: unit.family,
        cancel: ctx.cancel.clone(),
    };
    let mut report = UnitReport::default();
    let mut failure = None;
    let mut polls = JoinSet::new();

    for (index, target) in unit.targets.iter().enumerate() {
        if index > 0 && !sleep_or_cancel(ctx.pacing.registration_delay, &ctx.cancel).await {
            report.abandoned += unit.targets.len() - index;
            break;
        }
        match register(ctx, unit.family, proxy, target).await {
            Ok((request, first)) => {
                polls.spawn(shared.clone().finish(request, first));
            }
            Err(ScanError::Cancelled) => {
                report.abandoned += unit.targets.len() - index;
                break;
            }
            Err(e) => {
                error!(
                    "Stopping registrations via {proxy} with {} of {} targets left: {e}",
                    unit.targets.len() - index,
                    unit.targets.len()
                );
                report.errored += unit.targets.len() - index;
                failure = Some(e);
                break;
            }
        }
    }

    while let Some(joined) = polls.join_next().await {
        match joined {
            Ok(Ok(target_report)) => report.merge(&target_report),
            Ok(Err(ScanError::Cancelled)) => report.abandoned += 1,
            Ok(Err(ScanError::Provider(contract @ ProviderError::Contract(_)))) => {
                error!("Provider contract violation while polling: {contract}");
                report.errored += 1;
                if failure.is_none() {
                    failure = Some(contract.into());
                }
            }
            Ok(Err(e)) => {
                ctx.stats.increment_error(ErrorType::StoreError);
                warn!("Scan result lost: {e}");
                report.errored += 1;
            }
            Err(join_error) => {
                ctx.stats.increment_error(ErrorType::UnitPanicked);
                warn!("Poll task failed: {join_error}");
                report.errored += 1;
            }
        }
    }
    (report, failure)
}

/// Why the current proxy is being given up, if it should be.
fn failover_reason(
    error: &TransportError,
    consecutive_failures: u32,
    pacing: &Pacing,
) -> Option<String> {
    if error.is_proxy_failure() {
        Some(error.to_string())
    } else if consecutive_failures >= pacing.proxy_failure_threshold {
        Some(format!("{consecutive_failures} consecutive failures, last: {error}"))
    } else {
        None
    }
}

/// Registers one target, waiting for capacity first.
///
/// Transport failures are retried on the same proxy until they look like
/// the proxy's fault, at which point it is marked dead and replaced.
async fn register(
    ctx: &ScanContext,
    family: ScanFamily,
    proxy: &mut Proxy,
    target: &Target,
) -> Result<(ScanRequest, Observed), ScanError> {
    let provider = ctx.provider();
    let poller = Poller::new(provider.as_ref(), &ctx.pool, &ctx.stats, family);
    let mut consecutive_failures = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        match provider.capacity(proxy).await {
            Ok(snapshot) if snapshot.has_room() => {}
            Ok(snapshot) => {
                info!(
                    "{proxy} has no room ({}/{} running), waiting {}s",
                    snapshot.current,
                    snapshot.max.min(snapshot.this_client),
                    ctx.pacing.capacity_wait.as_secs()
                );
                wait(ctx.pacing.capacity_wait, &ctx.cancel).await?;
                continue;
            }
            Err(ProviderError::Overloaded(reason)) => {
                ctx.stats.increment_error(ErrorType::ProviderOverloaded);
                info!(
                    "Provider overloaded via {proxy} ({reason}), waiting {}s",
                    ctx.pacing.capacity_wait.as_secs()
                );
                wait(ctx.pacing.capacity_wait, &ctx.cancel).await?;
                continue;
            }
            Err(ProviderError::Transport(e)) => {
                consecutive_failures += 1;
                ctx.stats.increment_error(ErrorType::ProviderTransportError);
                warn!("Capacity check via {proxy} failed: {e}");
                if let Some(reason) = failover_reason(&e, consecutive_failures, &ctx.pacing) {
                    replace_proxy(ctx, proxy, &reason).await?;
                    consecutive_failures = 0;
                } else {
                    wait(ctx.pacing.capacity_wait, &ctx.cancel).await?;
                }
                continue;
            }
            Err(contract) => {
                ctx.stats.increment_error(ErrorType::ProviderContractError);
                return Err(contract.into());
            }
        }

        let mut request = ScanRequest::new(target.clone(), proxy.clone(), &ctx.pacing);
        let result: Result<ProviderResponse, ProviderError> = provider.register(proxy, target).await;
        let call_failed = result.is_err();
        let transport_error = result.as_ref().err().and_then(ProviderError::transport).cloned();

        if let Some(e) = &transport_error {
            consecutive_failures += 1;
            if let Some(reason) = failover_reason(e, consecutive_failures, &ctx.pacing) {
                ctx.stats.increment_error(ErrorType::ProviderTransportError);
                replace_proxy(ctx, proxy, &reason).await?;
                consecutive_failures = 0;
                continue;
            }
        }

        match poller.observe(&mut request, result).await? {
            Observed::Wait(retry_in) if call_failed => {
                wait(retry_in, &ctx.cancel).await?;
            }
            observed => {
                ctx.stats.increment_info(InfoType::ScanRegistered);
                debug!("Registered {} via {proxy}", target.address());
                return Ok((request, observed));
            }
        }
    }
}

async fn wait(duration: Duration, cancel: &CancellationToken) -> Result<(), ScanError> {
    if sleep_or_cancel(duration, cancel).await {
        Ok(())
    } else {
        Err(ScanError::Cancelled)
    }
}

/// Marks `proxy` dead, releases it and claims another in its place.
async fn replace_proxy(ctx: &ScanContext, proxy: &mut Proxy, reason: &str) -> Result<(), ScanError> {
    ctx.proxies.mark_dead(proxy, reason).await?;
    ctx.stats.increment_error(ErrorType::ProxyMarkedDead);
    ctx.proxies.release(proxy).await?;
    let replacement = ctx.proxies.claim(&ctx.cancel).await?;
    info!("Replaced {proxy} with {replacement} mid-batch");
    ctx.stats.increment_info(InfoType::ProxyReclaimed);
    *proxy = replacement;
    Ok(())
}
