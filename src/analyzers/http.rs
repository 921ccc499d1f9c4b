//! Security headers of an HTTP(S) endpoint.
//!
//! Input: `{"scheme": "https", "status": 200, "headers": {"name": "value", ...}}`
//! with lower-cased header names.

use serde_json::{Map, Value};

use crate::models::{Analysis, ScanType, Severity};

use super::uninterpretable;

const HSTS: ScanType = ScanType::HttpSecurityHeaderStrictTransportSecurity;
const CONTENT_TYPE_OPTIONS: ScanType = ScanType::HttpSecurityHeaderXContentTypeOptions;
const FRAME_OPTIONS: ScanType = ScanType::HttpSecurityHeaderXFrameOptions;

pub(super) fn analyze(raw: &Value) -> Vec<Analysis> {
    let (Some(headers), Some(scheme)) = (
        raw.get("headers").and_then(Value::as_object),
        raw.get("scheme").and_then(Value::as_str),
    ) else {
        return vec![
            uninterpretable(HSTS, raw),
            uninterpretable(CONTENT_TYPE_OPTIONS, raw),
            uninterpretable(FRAME_OPTIONS, raw),
        ];
    };

    let mut analyses = Vec::with_capacity(3);
    // HSTS is ignored by browsers on plain http.
    if scheme == "https" {
        analyses.push(strict_transport_security(headers));
    }
    analyses.push(content_type_options(headers));
    analyses.push(frame_options(headers));
    analyses
}

fn header<'a>(headers: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(Value::as_str).map(str::trim)
}

fn max_age(value: &str) -> Option<u64> {
    value.split(';').find_map(|directive| {
        let (key, v) = directive.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            v.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

fn strict_transport_security(headers: &Map<String, Value>) -> Analysis {
    match header(headers, "strict-transport-security") {
        None => Analysis::new(
            HSTS,
            "missing",
            Severity::Medium,
            "Strict-Transport-Security header is missing",
        ),
        Some(value) => match max_age(value) {
            Some(age) if age > 0 => Analysis::new(
                HSTS,
                "present",
                Severity::Ok,
                "Strict-Transport-Security header is set",
            )
            .with_evidence(value),
            Some(_) => Analysis::new(
                HSTS,
                "disabled",
                Severity::Medium,
                "Strict-Transport-Security max-age is zero",
            )
            .with_evidence(value),
            None => Analysis::new(
                HSTS,
                "invalid",
                Severity::Medium,
                "Strict-Transport-Security header has no valid max-age",
            )
            .with_evidence(value),
        },
    }
}

fn content_type_options(headers: &Map<String, Value>) -> Analysis {
    match header(headers, "x-content-type-options") {
        Some(value) if value.eq_ignore_ascii_case("nosniff") => Analysis::new(
            CONTENT_TYPE_OPTIONS,
            "present",
            Severity::Ok,
            "X-Content-Type-Options is nosniff",
        )
        .with_evidence(value),
        Some(value) => Analysis::new(
            CONTENT_TYPE_OPTIONS,
            "invalid",
            Severity::Low,
            "X-Content-Type-Options has an unknown value",
        )
        .with_evidence(value),
        None => Analysis::new(
            CONTENT_TYPE_OPTIONS,
            "missing",
            Severity::Low,
            "X-Content-Type-Options header is missing",
        ),
    }
}

fn frame_options(headers: &Map<String, Value>) -> Analysis {
    match header(headers, "x-frame-options") {
        Some(value)
            if value.eq_ignore_ascii_case("deny") || value.eq_ignore_ascii_case("sameorigin") =>
        {
            Analysis::new(
                FRAME_OPTIONS,
                "present",
                Severity::Ok,
                "X-Frame-Options restricts framing",
            )
            .with_evidence(value)
        }
        Some(value) => Analysis::new(
            FRAME_OPTIONS,
            "invalid",
            Severity::Low,
            "X-Frame-Options has an unknown value",
        )
        .with_evidence(value),
        None => Analysis::new(
            FRAME_OPTIONS,
            "missing",
            Severity::Low,
            "X-Frame-Options header is missing",
        ),
    }
}
