//! Configuration constants.
//!
//! This module defines the operational parameters used as defaults throughout
//! the orchestration core: batch sizing, proxy capacity thresholds, pacing
//! delays, polling backoff and network timeouts.

use std::time::Duration;

/// Default SQLite database path
pub const DB_PATH: &str = "./scan_fleet.db";

/// Maximum number of targets bound to one proxy claim
pub const BATCH_SIZE: usize = 25;

/// Default number of work units processed in parallel
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

/// Default number of batch claims allowed per minute across all workers
pub const DEFAULT_CLAIMS_PER_MINUTE: u32 = 6;

// Proxy capacity thresholds
/// A proxy is busy when the provider reports fewer assessments than this
/// (globally or for this client)
pub const MIN_PROVIDER_CAPACITY: i64 = 20;
/// A proxy is busy when more assessments than this are already running
pub const MAX_CURRENT_ASSESSMENTS: i64 = 19;

// Proxy pool
/// Wait between claim attempts when no proxy is available or a claimed proxy failed its check
pub const PROXY_CLAIM_RETRY: Duration = Duration::from_secs(60);
/// Number of health-check attempts before a proxy is considered unreachable
pub const HEALTH_CHECK_ATTEMPTS: usize = 3;
/// Fixed delay between health-check attempts
pub const HEALTH_CHECK_RETRY_DELAY: Duration = Duration::from_secs(10);
/// Interval between periodic health checks of the whole pool
pub const HEALTH_MONITOR_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Consecutive transport failures during registration before the proxy is given up
pub const PROXY_FAILURE_THRESHOLD: u32 = 3;

// Batch pacing
/// Delay between two scan registrations on the same proxy
pub const REGISTRATION_DELAY: Duration = Duration::from_secs(70);
/// Wait before re-checking remote capacity when it was insufficient
pub const CAPACITY_WAIT: Duration = Duration::from_secs(70);

// Polling backoff
/// Base wait between polls, also the value backoff resets to
pub const POLL_BASE_WAIT: Duration = Duration::from_secs(60);
/// Amount added to the backoff on every concurrency-limit response
pub const POLL_BACKOFF_INCREMENT: Duration = Duration::from_secs(30);
/// Backoff never exceeds this
pub const POLL_BACKOFF_CEILING: Duration = Duration::from_secs(180);

// Outbound call timeouts
/// Connect timeout for calls to the provider
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(120);
/// Time the provider may spend producing a response once connected
pub const REMOTE_PROCESSING_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for local probes (FTP banner, HTTP headers)
pub const PROBE_TIMEOUT_SECS: u64 = 10;
/// DNS query timeout in seconds
pub const DNS_TIMEOUT_SECS: u64 = 3;

// Provider defaults
/// SSL Labs compatible API root
pub const DEFAULT_PROVIDER_API_URL: &str = "https://api.ssllabs.com/api/v3";
/// Page fetched through a proxy to measure latency
pub const DEFAULT_PROVIDER_CONTENT_URL: &str = "https://www.ssllabs.com/ssltest/";

/// User-Agent sent to the provider and probed targets
pub const DEFAULT_USER_AGENT: &str = concat!("scan_fleet/", env!("CARGO_PKG_VERSION"));

/// Maximum stored length of a scratchpad payload in characters
/// Provider responses for hosts with many endpoints can be large
pub const MAX_SCRATCHPAD_LENGTH: usize = 512 * 1024;

/// Scratchpad entries older than this are pruned at the end of a run
pub const SCRATCHPAD_RETENTION_DAYS: i64 = 7;

/// Progress logging interval in seconds
pub const LOGGING_INTERVAL: u64 = 30;

// HTTP status codes used in provider response classification
pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const HTTP_STATUS_SERVICE_UNAVAILABLE: u16 = 503;
pub const HTTP_STATUS_SITE_OVERLOADED: u16 = 529;
