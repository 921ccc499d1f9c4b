//! Configuration types and CLI options.
//!
//! This module defines the library configuration snapshot (`Config`), the
//! pacing parameters injected into the orchestration components, and the
//! command-line surface (`Opt`) that the binary converts into a `Config`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::capabilities::ScopeEntry;
use crate::config::constants::*;
use crate::models::ScanFamily;
use crate::targets::{OrganizationFilter, TargetFilters, UrlFilter};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Every wait, backoff and timeout used by the orchestration core.
///
/// Grouped so that a whole run can be slowed down or sped up at once; the
/// defaults match what the remote provider tolerates in production.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Wait between claim attempts while the proxy pool is exhausted
    pub proxy_claim_retry: Duration,
    /// Delay between consecutive scan registrations on one proxy
    pub registration_delay: Duration,
    /// Wait before re-checking remote capacity
    pub capacity_wait: Duration,
    /// Base poll interval; backoff resets to this value
    pub poll_base_wait: Duration,
    /// Backoff increment on concurrency-limit responses
    pub poll_backoff_increment: Duration,
    /// Upper bound of the poll backoff
    pub poll_backoff_ceiling: Duration,
    /// Connect timeout for provider calls
    pub network_timeout: Duration,
    /// Response timeout for provider calls, on top of the connect timeout
    pub remote_processing_timeout: Duration,
    /// Health-check attempts before a proxy is declared unreachable
    pub health_check_attempts: usize,
    /// Fixed delay between health-check attempts
    pub health_check_retry_delay: Duration,
    /// Interval of the periodic pool health monitor
    pub health_monitor_interval: Duration,
    /// Consecutive registration transport failures before a proxy is given up
    pub proxy_failure_threshold: u32,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            proxy_claim_retry: PROXY_CLAIM_RETRY,
            registration_delay: REGISTRATION_DELAY,
            capacity_wait: CAPACITY_WAIT,
            poll_base_wait: POLL_BASE_WAIT,
            poll_backoff_increment: POLL_BACKOFF_INCREMENT,
            poll_backoff_ceiling: POLL_BACKOFF_CEILING,
            network_timeout: NETWORK_TIMEOUT,
            remote_processing_timeout: REMOTE_PROCESSING_TIMEOUT,
            health_check_attempts: HEALTH_CHECK_ATTEMPTS,
            health_check_retry_delay: HEALTH_CHECK_RETRY_DELAY,
            health_monitor_interval: HEALTH_MONITOR_INTERVAL,
            proxy_failure_threshold: PROXY_FAILURE_THRESHOLD,
        }
    }
}

/// Remote endpoints of the scan provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// API root, e.g. `https://api.ssllabs.com/api/v3`
    pub api_url: String,
    /// Page fetched through a proxy to measure its latency
    pub content_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_PROVIDER_API_URL.to_string(),
            content_url: DEFAULT_PROVIDER_CONTENT_URL.to_string(),
        }
    }
}

/// Library configuration (no CLI dependencies).
///
/// This is the configuration snapshot injected into every component at
/// construction. It can be built programmatically without any CLI parsing.
///
/// # Examples
///
/// ```no_run
/// use scan_fleet::Config;
/// use scan_fleet::capabilities::ScopeEntry;
///
/// let config = Config {
///     scope: vec![ScopeEntry::new("NL", "municipality")],
///     max_concurrency: 4,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Database path (SQLite file)
    pub db_path: PathBuf,

    /// Number of work units processed in parallel
    pub max_concurrency: usize,

    /// Targets per batch (one proxy claim per batch)
    pub batch_size: usize,

    /// Global cap on batch claims per minute (0 disables the cap)
    pub claims_per_minute: u32,

    /// Scan families the operator has enabled
    pub enabled_families: Vec<ScanFamily>,

    /// (country, organization type) pairs that may be scanned. Empty means nothing is scanned.
    pub scope: Vec<ScopeEntry>,

    /// Remote provider endpoints
    pub provider: ProviderEndpoints,

    /// Waits, backoff and timeouts
    pub pacing: Pacing,

    /// HTTP User-Agent header value
    pub user_agent: String,

    /// Clear claim flags left behind by a crashed run before scanning
    pub release_stale_claims: bool,

    /// Proxy addresses (`host:port`) to register before scanning
    pub proxies: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            db_path: PathBuf::from(DB_PATH),
            max_concurrency: DEFAULT_WORKER_CONCURRENCY,
            batch_size: BATCH_SIZE,
            claims_per_minute: DEFAULT_CLAIMS_PER_MINUTE,
            enabled_families: ScanFamily::all(),
            scope: Vec::new(),
            provider: ProviderEndpoints::default(),
            pacing: Pacing::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            release_stale_claims: false,
            proxies: Vec::new(),
        }
    }
}

/// Command-line options of the `scan_fleet` binary.
#[derive(Debug, Parser)]
#[command(name = "scan_fleet", version, about = "Run scan fleets through a proxy pool")]
pub struct Opt {
    /// Log level
    #[arg(long, value_enum, default_value = "info", env = "SCAN_FLEET_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain", env = "SCAN_FLEET_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// SQLite database path
    #[arg(long, default_value = DB_PATH, env = "SCAN_FLEET_DB_PATH")]
    pub db_path: PathBuf,

    /// Work units processed in parallel
    #[arg(long, default_value_t = DEFAULT_WORKER_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Global cap on batch claims per minute (0 disables)
    #[arg(long, default_value_t = DEFAULT_CLAIMS_PER_MINUTE)]
    pub claims_per_minute: u32,

    /// Scan family to run (repeatable, defaults to all)
    #[arg(long = "family")]
    pub families: Vec<ScanFamily>,

    /// Scope entry as COUNTRY:ORGANIZATION_TYPE (repeatable)
    #[arg(long = "scope", env = "SCAN_FLEET_SCOPE", value_delimiter = ',')]
    pub scope: Vec<ScopeEntry>,

    /// Restrict to organizations with this name (repeatable)
    #[arg(long = "organization")]
    pub organizations: Vec<String>,

    /// Restrict to this url (repeatable)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Provider API root
    #[arg(long, default_value = DEFAULT_PROVIDER_API_URL, env = "SCAN_FLEET_PROVIDER_API_URL")]
    pub provider_api_url: String,

    /// Clear claim flags left behind by a crashed run before scanning
    #[arg(long)]
    pub release_stale_claims: bool,

    /// HTTP proxy as HOST:PORT to add to the pool (repeatable)
    #[arg(long = "proxy", env = "SCAN_FLEET_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,
}

impl Opt {
    /// Converts the parsed options into a library configuration.
    pub fn to_config(&self) -> Config {
        let enabled_families = if self.families.is_empty() {
            ScanFamily::all()
        } else {
            self.families.clone()
        };
        Config {
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            db_path: self.db_path.clone(),
            max_concurrency: self.max_concurrency.max(1),
            claims_per_minute: self.claims_per_minute,
            enabled_families,
            scope: self.scope.clone(),
            provider: ProviderEndpoints {
                api_url: self.provider_api_url.clone(),
                ..Default::default()
            },
            release_stale_claims: self.release_stale_claims,
            proxies: self.proxies.clone(),
            ..Default::default()
        }
    }

    /// Target filters requested on the command line.
    pub fn filters(&self) -> TargetFilters {
        TargetFilters {
            organizations: OrganizationFilter {
                names: (!self.organizations.is_empty()).then(|| self.organizations.clone()),
                ..Default::default()
            },
            urls: UrlFilter {
                urls: (!self.urls.is_empty()).then(|| self.urls.clone()),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
