//! Small helpers shared by the orchestration components.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns false when the wait was cut short by cancellation. Every blocking
/// wait of the core (claim retry, registration pacing, poll backoff) goes
/// through here so that a shutdown never waits out a multi-minute sleep.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
