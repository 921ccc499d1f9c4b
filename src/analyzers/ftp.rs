use serde_json::Value;

use crate::models::{Analysis, ScanType, Severity};

use super::uninterpretable;

pub(super) fn analyze(raw: &Value) -> Vec<Analysis> {
    let reachable = raw.get("reachable").and_then(Value::as_bool);
    let supports_tls = raw.get("supports_tls").and_then(Value::as_bool);
    let banner = raw
        .get("banner")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let analysis = match (reachable, supports_tls) {
        (Some(false), _) => Analysis::new(
            ScanType::Ftp,
            "not_reachable",
            Severity::NoInformation,
            "FTP server could not be reached",
        ),
        (Some(true), Some(true)) => Analysis::new(
            ScanType::Ftp,
            "secure",
            Severity::Ok,
            "FTP server supports encryption",
        )
        .with_evidence(banner),
        (Some(true), Some(false)) => Analysis::new(
            ScanType::Ftp,
            "insecure",
            Severity::High,
            "FTP server does not support encryption",
        )
        .with_evidence(banner),
        _ => uninterpretable(ScanType::Ftp, raw),
    };
    vec![analysis]
}
