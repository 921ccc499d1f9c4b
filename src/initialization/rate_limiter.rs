//! Rate limiter initialization.
//!
//! This module provides the token-bucket rate limiter that caps how often
//! batches may claim a proxy, across all workers of a run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore as TokioSemaphore;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Token-bucket rate limiter.
///
/// Tokens are replenished continuously at `permits` per `period`, never above
/// the burst capacity. Each acquire consumes one token for good.
///
/// # Behavior
///
/// - Uses a background task for token replenishment
/// - Supports graceful shutdown via `CancellationToken`
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<TokioSemaphore>,
}

impl RateLimiter {
    /// Waits for and consumes one token.
    pub async fn acquire(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }

    /// Waits for a token unless cancelled first. Returns false on cancellation.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.acquire() => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// Initializes a token-bucket rate limiter allowing `permits` per `period`.
///
/// If `permits` is 0, rate limiting is disabled and `None` is returned.
/// The bucket starts full (`burst` tokens).
///
/// # Returns
///
/// A tuple of `(RateLimiter, CancellationToken)`. Cancelling the token stops
/// the background replenishment task.
pub fn init_rate_limiter(
    permits: u32,
    period: Duration,
    burst: usize,
) -> Option<(Arc<RateLimiter>, CancellationToken)> {
    if permits == 0 || period.is_zero() {
        return None;
    }
    let capacity = burst.max(1);
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    let limiter = Arc::new(RateLimiter {
        permits: Arc::new(TokioSemaphore::new(capacity)),
    });
    let per_second = f64::from(permits) / period.as_secs_f64();

    let bucket = Arc::clone(&limiter.permits);
    let mut ticker = interval(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut last_time = tokio::time::Instant::now();
        let mut fractional_permits = 0.0f64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = tokio::time::Instant::now();
                    let elapsed = now.duration_since(last_time);
                    last_time = now;

                    let to_add_f64 = per_second * elapsed.as_secs_f64() + fractional_permits;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let to_add = to_add_f64 as usize;
                    #[allow(clippy::cast_precision_loss)]
                    {
                        fractional_permits = to_add_f64 - to_add as f64;
                    }

                    let room = capacity.saturating_sub(bucket.available_permits());
                    let to_add = to_add.min(room);
                    if to_add > 0 {
                        bucket.add_permits(to_add);
                    }
                }
                _ = shutdown_clone.cancelled() => {
                    log::debug!("Rate limiter background task shutting down");
                    break;
                }
            }
        }
    });

    Some((limiter, shutdown))
}

/// Initializes the global batch-claim limiter (`per_minute` claims per minute).
pub fn init_claim_rate_limiter(
    per_minute: u32,
    burst: usize,
) -> Option<(Arc<RateLimiter>, CancellationToken)> {
    init_rate_limiter(per_minute, Duration::from_secs(60), burst)
}
