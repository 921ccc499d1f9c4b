use serde_json::Value;

use crate::models::{Analysis, ScanType, Severity};

use super::uninterpretable;

pub(super) fn analyze(raw: &Value) -> Vec<Analysis> {
    let analysis = match raw.get("resolvable").and_then(Value::as_bool) {
        Some(true) => {
            let addresses = raw
                .get("addresses")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            Analysis::new(
                ScanType::DnsResolvable,
                "resolvable",
                Severity::Ok,
                "Domain resolves",
            )
            .with_evidence(addresses)
        }
        Some(false) => Analysis::new(
            ScanType::DnsResolvable,
            "not_resolvable",
            Severity::Low,
            "Domain does not resolve",
        ),
        None => uninterpretable(ScanType::DnsResolvable, raw),
    };
    vec![analysis]
}
