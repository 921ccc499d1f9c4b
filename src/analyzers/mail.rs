//! SPF and DMARC policies from TXT records.
//!
//! Input: `{"spf": [txt, ...], "dmarc": [txt, ...]}` holding the TXT records
//! of the domain and of `_dmarc.<domain>` respectively, unfiltered.

use serde_json::Value;

use crate::models::{Analysis, ScanType, Severity};

use super::uninterpretable;

pub(super) fn analyze(raw: &Value) -> Vec<Analysis> {
    let spf = records(raw, "spf", "v=spf1");
    let dmarc = records(raw, "dmarc", "v=dmarc1");
    vec![
        spf.map_or_else(|| uninterpretable(ScanType::MailSpf, raw), |r| analyze_spf(&r)),
        dmarc.map_or_else(|| uninterpretable(ScanType::MailDmarc, raw), |r| analyze_dmarc(&r)),
    ]
}

/// TXT records under `key` that start with `prefix` (case-insensitive).
fn records(raw: &Value, key: &str, prefix: &str) -> Option<Vec<String>> {
    let all = raw.get(key)?.as_array()?;
    Some(
        all.iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|txt| txt.to_lowercase().starts_with(prefix))
            .map(str::to_string)
            .collect(),
    )
}

fn analyze_spf(records: &[String]) -> Analysis {
    let record = match records {
        [] => {
            return Analysis::new(
                ScanType::MailSpf,
                "missing",
                Severity::Medium,
                "No SPF record",
            )
        }
        [record] => record,
        _ => {
            return Analysis::new(
                ScanType::MailSpf,
                "multiple",
                Severity::High,
                "Multiple SPF records; receivers treat this as an error",
            )
            .with_evidence(records.join(" | "))
        }
    };

    let all = record
        .split_whitespace()
        .map(str::to_lowercase)
        .find(|term| term.trim_start_matches(&['+', '-', '~', '?'][..]) == "all");
    let (rating, severity, message) = match all.as_deref() {
        Some("-all") => ("hard_fail", Severity::Ok, "SPF rejects unlisted senders"),
        Some("~all") => ("soft_fail", Severity::Low, "SPF only soft-fails unlisted senders"),
        Some("?all") => ("neutral", Severity::Medium, "SPF is neutral about unlisted senders"),
        Some(_) => ("pass_all", Severity::High, "SPF allows every sender"),
        None => ("no_all", Severity::Medium, "SPF record has no 'all' mechanism"),
    };
    Analysis::new(ScanType::MailSpf, rating, severity, message).with_evidence(record.as_str())
}

fn analyze_dmarc(records: &[String]) -> Analysis {
    let record = match records {
        [] => {
            return Analysis::new(
                ScanType::MailDmarc,
                "missing",
                Severity::Medium,
                "No DMARC record",
            )
        }
        [record] => record,
        _ => {
            return Analysis::new(
                ScanType::MailDmarc,
                "multiple",
                Severity::High,
                "Multiple DMARC records; receivers ignore the policy",
            )
            .with_evidence(records.join(" | "))
        }
    };

    let policy = record.split(';').find_map(|tag| {
        let (key, value) = tag.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("p")
            .then(|| value.trim().to_lowercase())
    });
    let (rating, severity, message) = match policy.as_deref() {
        Some("reject") => ("reject", Severity::Ok, "DMARC policy rejects failing mail"),
        Some("quarantine") => (
            "quarantine",
            Severity::Ok,
            "DMARC policy quarantines failing mail",
        ),
        Some("none") => ("none", Severity::Low, "DMARC policy only monitors"),
        _ => ("invalid", Severity::Medium, "DMARC record has no valid policy"),
    };
    Analysis::new(ScanType::MailDmarc, rating, severity, message).with_evidence(record.as_str())
}
