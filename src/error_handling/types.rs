//! Error type definitions.
//!
//! This module defines the typed errors of the orchestration core and the
//! counters tracked in `ProcessingStats`.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing an HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),

    /// Error initializing the DNS resolver.
    #[error("DNS resolver initialization error: {0}")]
    DnsResolverError(String),
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped back onto a domain type.
    #[error("Invalid value '{value}' in column {column}")]
    InvalidValue { column: &'static str, value: String },
}

/// Transport-level failure of an outbound call.
///
/// These never indicate a broken integration: they are retried, or, for
/// `Tls` and `ProxyProtocol`, lead to the proxy being taken out of the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS/SSL failure: {0}")]
    Tls(String),

    #[error("proxy protocol failure: {0}")]
    ProxyProtocol(String),

    #[error("response body error: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// True when the failure is attributable to the proxy itself rather than
    /// to a momentary network or provider hiccup.
    pub fn is_proxy_failure(&self) -> bool {
        matches!(self, TransportError::Tls(_) | TransportError::ProxyProtocol(_))
    }
}

/// Errors from the remote scan provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The call did not produce a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The provider answered in a shape the integration cannot work with
    /// (missing required field, unknown API version). Never retried.
    #[error("provider contract violation: {0}")]
    Contract(String),

    /// The provider answered but is out of capacity or rate-limiting this
    /// client. Always transient.
    #[error("provider overloaded: {0}")]
    Overloaded(String),
}

impl ProviderError {
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ProviderError::Transport(e) => Some(e),
            ProviderError::Contract(_) | ProviderError::Overloaded(_) => None,
        }
    }
}

/// Errors from local probes.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The target could not be reached at all (refused, no route, timeout).
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// The target name does not resolve.
    #[error("target does not resolve: {0}")]
    Unresolvable(String),

    /// The probe could not be carried out for another reason.
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Errors that end a work unit.
///
/// Unit failures are isolated: sibling units keep running.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The run was cancelled; in-flight results are scratched.
    #[error("scan cancelled")]
    Cancelled,

    /// A task inside the unit panicked.
    #[error("scan task panicked: {0}")]
    Panicked(String),
}

impl From<sqlx::Error> for ScanError {
    fn from(e: sqlx::Error) -> Self {
        ScanError::Database(DatabaseError::SqlError(e))
    }
}

/// Error and warning conditions counted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorType {
    // Proxy pool
    ProxyMarkedDead,
    ProxyBusy,
    // Provider
    ProviderOverloaded,
    ProviderConcurrencyLimited,
    ProviderUnexpectedResponse,
    ProviderTransportError,
    ProviderTerminalError,
    ProviderContractError,
    // Local probes
    ProbeUnreachable,
    ProbeFailed,
    // Units
    UnitFailed,
    UnitPanicked,
    StoreError,
}

/// Informational events counted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum InfoType {
    ProxyClaimed,
    ProxyReclaimed,
    ScanRegistered,
    ScanCompleted,
    RecordCreated,
    RecordRefreshed,
    TargetMarkedDead,
    ResolvabilityChanged,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ProxyMarkedDead => "Proxy marked dead",
            ErrorType::ProxyBusy => "Proxy out of provider capacity",
            ErrorType::ProviderOverloaded => "Provider overloaded",
            ErrorType::ProviderConcurrencyLimited => "Provider concurrency limit reached",
            ErrorType::ProviderUnexpectedResponse => "Unexpected provider response",
            ErrorType::ProviderTransportError => "Provider transport error",
            ErrorType::ProviderTerminalError => "Provider terminal error",
            ErrorType::ProviderContractError => "Provider contract violation",
            ErrorType::ProbeUnreachable => "Probe target unreachable",
            ErrorType::ProbeFailed => "Probe failed",
            ErrorType::UnitFailed => "Work unit failed",
            ErrorType::UnitPanicked => "Work unit panicked",
            ErrorType::StoreError => "Result store error",
        }
    }
}

impl std::fmt::Display for InfoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::ProxyClaimed => "Proxy claimed",
            InfoType::ProxyReclaimed => "Proxy replaced mid-batch",
            InfoType::ScanRegistered => "Scan registered",
            InfoType::ScanCompleted => "Scan reached terminal state",
            InfoType::RecordCreated => "Result record created",
            InfoType::RecordRefreshed => "Result record refreshed",
            InfoType::TargetMarkedDead => "Target marked dead",
            InfoType::ResolvabilityChanged => "Url resolvability changed",
        }
    }
}
