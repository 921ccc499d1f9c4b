//! Classification of provider answers.
//!
//! The provider signals overload and concurrency limits through HTTP status
//! codes and free-text error messages. All of those variants collapse into
//! one `PollOutcome` each, so the polling loop has a single rule per condition.

use serde_json::Value;

use crate::config::{
    HTTP_STATUS_SERVICE_UNAVAILABLE, HTTP_STATUS_SITE_OVERLOADED, HTTP_STATUS_TOO_MANY_REQUESTS,
};
use crate::error_handling::{ProviderError, TransportError};

use super::CapacitySnapshot;

/// What a poll or registration answer means for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Assessment finished with data.
    Ready,
    /// Assessment finished with an error (unresolvable host, malformed name, ...).
    Error,
    /// Accepted and still running.
    Pending,
    /// Provider out of capacity; try again later.
    Overloaded,
    /// Too many concurrent or too many new assessments for this client.
    ConcurrencyLimited,
    /// Anything else.
    Unexpected,
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Ready | PollOutcome::Error)
    }
}

const OVERLOAD_MESSAGES: &[&str] = &["running at full capacity", "try again later"];

const CONCURRENCY_MESSAGES: &[&str] = &[
    "concurrent assessment limit reached",
    "too many concurrent assessments",
    "too many new assessments too fast",
];

/// Maps an HTTP status and body onto a `PollOutcome`. Never fails.
pub fn classify(http_status: u16, body: &Value) -> PollOutcome {
    if (200..300).contains(&http_status) {
        match body.get("status").and_then(Value::as_str) {
            Some("READY") => return PollOutcome::Ready,
            Some("ERROR") => return PollOutcome::Error,
            Some("DNS") | Some("IN_PROGRESS") => return PollOutcome::Pending,
            _ => {}
        }
    }

    let messages = error_messages(body);
    let mentions = |needles: &[&str]| {
        messages
            .iter()
            .any(|m| needles.iter().any(|needle| m.contains(needle)))
    };

    if http_status == HTTP_STATUS_TOO_MANY_REQUESTS || mentions(CONCURRENCY_MESSAGES) {
        PollOutcome::ConcurrencyLimited
    } else if http_status == HTTP_STATUS_SERVICE_UNAVAILABLE
        || http_status == HTTP_STATUS_SITE_OVERLOADED
        || mentions(OVERLOAD_MESSAGES)
    {
        PollOutcome::Overloaded
    } else {
        PollOutcome::Unexpected
    }
}

/// Lower-cased `errors[].message` entries, plus a top-level `message` if present.
fn error_messages(body: &Value) -> Vec<String> {
    let mut messages: Vec<String> = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default();
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        messages.push(message.to_lowercase());
    }
    messages
}

/// Reads capacity counters from an `info` answer.
///
/// `maxAssessments` and `currentAssessments` are required; without them the
/// integration is broken and the error must surface. `clientMaxAssessments`
/// defaults to `maxAssessments`.
pub fn parse_capacity(body: &Value) -> Result<CapacitySnapshot, ProviderError> {
    let field = |name: &str| body.get(name).and_then(Value::as_i64);
    let max = field("maxAssessments").ok_or_else(|| {
        ProviderError::Contract(format!("info response lacks maxAssessments: {body}"))
    })?;
    let current = field("currentAssessments").ok_or_else(|| {
        ProviderError::Contract(format!("info response lacks currentAssessments: {body}"))
    })?;
    let this_client = field("clientMaxAssessments").unwrap_or(max);
    Ok(CapacitySnapshot {
        max,
        current,
        this_client,
    })
}

/// Turns an `info` answer into capacity counters.
///
/// Overload and rate-limit answers are `ProviderError::Overloaded`. Any other
/// failing status, or a body that is not a JSON object (an error page from the
/// provider or from the proxy itself), fails the call at transport level. Only
/// a successful JSON answer without the counters is a contract violation.
pub fn interpret_info(http_status: u16, body: &Value) -> Result<CapacitySnapshot, ProviderError> {
    if matches!(
        classify(http_status, body),
        PollOutcome::Overloaded | PollOutcome::ConcurrencyLimited
    ) {
        return Err(ProviderError::Overloaded(format!(
            "info endpoint returned HTTP {http_status}"
        )));
    }
    if !(200..300).contains(&http_status) {
        return Err(
            TransportError::Other(format!("info endpoint returned HTTP {http_status}")).into(),
        );
    }
    if !body.is_object() {
        return Err(TransportError::ProxyProtocol(
            "info endpoint answered without a JSON object".to_string(),
        )
        .into());
    }
    parse_capacity(body)
}
