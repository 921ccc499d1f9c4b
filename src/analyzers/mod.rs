//! Result analyzers.
//!
//! Each scan family contributes a pure function from raw scanner output
//! (a JSON document) to one [`Analysis`] per scan type it can judge. Analyzers
//! never fail: output they cannot make sense of is rated with
//! `Severity::most_conservative()`.

mod dns;
mod ftp;
mod http;
mod mail;
mod tls;

use serde_json::Value;

use crate::models::{Analysis, ScanFamily, ScanType, Severity};

impl ScanFamily {
    /// Maps raw output of this family's scanner onto analyses.
    pub fn analyze(&self, raw: &Value) -> Vec<Analysis> {
        match self {
            ScanFamily::TlsQualys => tls::analyze(raw),
            ScanFamily::Ftp => ftp::analyze(raw),
            ScanFamily::HttpHeaders => http::analyze(raw),
            ScanFamily::Dns => dns::analyze(raw),
            ScanFamily::Mail => mail::analyze(raw),
        }
    }
}

const MAX_EVIDENCE_LENGTH: usize = 1024;

/// The analysis used when output could not be interpreted.
pub(crate) fn uninterpretable(scan_type: ScanType, raw: &Value) -> Analysis {
    let mut evidence = raw.to_string();
    let mut end = evidence.len().min(MAX_EVIDENCE_LENGTH);
    while !evidence.is_char_boundary(end) {
        end -= 1;
    }
    evidence.truncate(end);
    Analysis::new(
        scan_type,
        "uninterpretable",
        Severity::most_conservative(),
        "Scanner output could not be interpreted",
    )
    .with_evidence(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_family_survives_garbage() {
        for family in ScanFamily::iter() {
            for raw in [Value::Null, json!("text"), json!([1, 2]), json!({"unexpected": true})] {
                let analyses = family.analyze(&raw);
                assert!(!analyses.is_empty(), "{family} returned nothing for {raw}");
                for analysis in analyses {
                    assert_eq!(analysis.scan_type.family(), family);
                    assert_eq!(analysis.severity, Severity::High, "{family} on {raw}");
                }
            }
        }
    }

    #[test]
    fn test_uninterpretable_evidence_is_bounded() {
        let raw = json!({"blob": "é".repeat(2000)});
        let analysis = uninterpretable(ScanType::Ftp, &raw);
        assert!(analysis.evidence.len() <= MAX_EVIDENCE_LENGTH);
    }
}
