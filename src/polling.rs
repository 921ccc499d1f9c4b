//! Polling State Machine.
//!
//! `ScanRequest::advance` is the pure transition table: it takes a classified
//! provider answer and says whether the request is finished or how long to
//! wait before the next poll. [`Poller`] drives it against a provider,
//! writing every raw answer to the scratchpad.
//!
//! Backoff rule: pending answers reset the backoff to the base wait,
//! concurrency-limit answers raise it by one increment up to the ceiling,
//! everything else leaves it alone. Overload waits the base interval without
//! touching the backoff; unexpected answers and network errors wait the
//! current backoff.

use std::time::Duration;

use log::{debug, info, warn};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::Pacing;
use crate::error_handling::{ErrorType, InfoType, ProcessingStats, ProviderError, ScanError};
use crate::models::{ScanFamily, Target};
use crate::provider::{PollOutcome, ProviderResponse, ScanProvider};
use crate::proxy::Proxy;
use crate::storage::scratchpad;
use crate::utils::sleep_or_cancel;

/// Lifecycle of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Submitted,
    InProgress,
    Ready,
    Error,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Ready | RequestStatus::Error)
    }
}

/// Poll backoff bounded by `[base, ceiling]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    increment: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(pacing: &Pacing) -> Self {
        let ceiling = pacing.poll_backoff_ceiling.max(pacing.poll_base_wait);
        Self {
            base: pacing.poll_base_wait,
            increment: pacing.poll_backoff_increment,
            ceiling,
            current: pacing.poll_base_wait,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Raises the backoff by one increment, saturating at the ceiling.
    pub fn escalate(&mut self) -> Duration {
        self.current = (self.current + self.increment).min(self.ceiling);
        self.current
    }
}

/// What to do after an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Finished,
    Wait(Duration),
}

/// One target's outstanding request at the provider, through one proxy.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub target: Target,
    pub proxy: Proxy,
    pub status: RequestStatus,
    /// Sum of all waits scheduled so far
    pub waited: Duration,
    /// Answers that did not move the request forward (unexpected shapes, network errors)
    pub retries: u32,
    backoff: Backoff,
}

impl ScanRequest {
    pub fn new(target: Target, proxy: Proxy, pacing: &Pacing) -> Self {
        Self {
            target,
            proxy,
            status: RequestStatus::Submitted,
            waited: Duration::ZERO,
            retries: 0,
            backoff: Backoff::new(pacing),
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Applies one classified answer.
    pub fn advance(&mut self, outcome: PollOutcome) -> PollStep {
        let wait = match outcome {
            PollOutcome::Ready => {
                self.status = RequestStatus::Ready;
                return PollStep::Finished;
            }
            PollOutcome::Error => {
                self.status = RequestStatus::Error;
                return PollStep::Finished;
            }
            PollOutcome::Pending => {
                self.backoff.reset();
                self.backoff.base()
            }
            PollOutcome::Overloaded => self.backoff.base(),
            PollOutcome::ConcurrencyLimited => self.backoff.escalate(),
            PollOutcome::Unexpected => {
                self.retries += 1;
                self.backoff.current()
            }
        };
        self.status = RequestStatus::InProgress;
        self.waited += wait;
        PollStep::Wait(wait)
    }

    /// A poll that produced no answer at all. The request keeps its state
    /// and waits the current backoff.
    pub fn record_transport_error(&mut self) -> Duration {
        self.retries += 1;
        let wait = self.backoff.current();
        self.waited += wait;
        wait
    }
}

/// Result of feeding one call result into a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Terminal(ProviderResponse),
    Wait(Duration),
}

/// Drives `ScanRequest`s against a provider.
pub struct Poller<'a> {
    provider: &'a dyn ScanProvider,
    pool: &'a SqlitePool,
    stats: &'a ProcessingStats,
    family: ScanFamily,
}

impl<'a> Poller<'a> {
    pub fn new(
        provider: &'a dyn ScanProvider,
        pool: &'a SqlitePool,
        stats: &'a ProcessingStats,
        family: ScanFamily,
    ) -> Self {
        Self {
            provider,
            pool,
            stats,
            family,
        }
    }

    /// Records a call result in the scratchpad and advances the request.
    ///
    /// Transport and overload errors are transient here. Contract errors are
    /// returned.
    pub async fn observe(
        &self,
        request: &mut ScanRequest,
        result: Result<ProviderResponse, ProviderError>,
    ) -> Result<Observed, ScanError> {
        let address = request.target.address();
        let response = match result {
            Ok(response) => response,
            Err(ProviderError::Transport(transport)) => {
                self.stats.increment_error(ErrorType::ProviderTransportError);
                warn!("Poll for {address} via {} failed: {transport}", request.proxy);
                self.scratch(&address, None, &transport.to_string()).await;
                return Ok(Observed::Wait(request.record_transport_error()));
            }
            Err(ProviderError::Overloaded(reason)) => {
                self.stats.increment_error(ErrorType::ProviderOverloaded);
                debug!("Provider overloaded for {address}: {reason}");
                self.scratch(&address, None, &reason).await;
                let wait = request.backoff.base();
                request.waited += wait;
                return Ok(Observed::Wait(wait));
            }
            Err(contract) => {
                self.stats.increment_error(ErrorType::ProviderContractError);
                return Err(contract.into());
            }
        };

        self.scratch(&address, Some(response.http_status), &response.raw)
            .await;

        let outcome = response.outcome();
        match outcome {
            PollOutcome::Overloaded => self.stats.increment_error(ErrorType::ProviderOverloaded),
            PollOutcome::ConcurrencyLimited => self
                .stats
                .increment_error(ErrorType::ProviderConcurrencyLimited),
            PollOutcome::Unexpected => {
                self.stats
                    .increment_error(ErrorType::ProviderUnexpectedResponse);
                warn!(
                    "Unexpected provider answer for {address} (HTTP {})",
                    response.http_status
                );
                debug!("Unexpected answer body: {}", response.raw);
            }
            PollOutcome::Error => self.stats.increment_error(ErrorType::ProviderTerminalError),
            PollOutcome::Ready | PollOutcome::Pending => {}
        }

        match request.advance(outcome) {
            PollStep::Finished => {
                self.stats.increment_info(InfoType::ScanCompleted);
                info!("{address}: {:?} after {}s", request.status, request.waited.as_secs());
                Ok(Observed::Terminal(response))
            }
            PollStep::Wait(wait) => Ok(Observed::Wait(wait)),
        }
    }

    /// Polls until the request reaches a terminal state, starting after `first_wait`.
    ///
    /// Returns `ScanError::Cancelled` if `cancel` fires during a wait; the
    /// provider-side scan keeps running and its result is dropped.
    pub async fn poll_until_terminal(
        &self,
        request: &mut ScanRequest,
        first_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ScanError> {
        let mut wait = first_wait;
        loop {
            if !sleep_or_cancel(wait, cancel).await {
                info!(
                    "Stopped polling {} on shutdown; result dropped",
                    request.target.address()
                );
                return Err(ScanError::Cancelled);
            }
            let result = self.provider.poll(&request.proxy, &request.target).await;
            match self.observe(request, result).await? {
                Observed::Terminal(response) => return Ok(response),
                Observed::Wait(next) => wait = next,
            }
        }
    }

    async fn scratch(&self, target: &str, http_status: Option<u16>, data: &str) {
        if let Err(e) = scratchpad::record(self.pool, self.family, target, http_status, data).await {
            warn!("Could not write scratchpad entry for {target}: {e}");
        }
    }
}
