//! Assessment reports from the remote TLS provider.

use serde_json::Value;

use crate::models::{Analysis, ScanType, Severity};

use super::uninterpretable;

const CERTIFICATE: ScanType = ScanType::TlsQualysCertificateTrusted;
const ENCRYPTION: ScanType = ScanType::TlsQualysEncryptionQuality;

/// Severity of an assessment grade, ignoring trust issues.
fn grade_severity(grade: &str) -> Option<Severity> {
    match grade {
        "A+" | "A" | "A-" => Some(Severity::Ok),
        "B" => Some(Severity::Low),
        "C" => Some(Severity::Medium),
        "D" | "E" | "F" => Some(Severity::High),
        _ => None,
    }
}

pub(super) fn analyze(raw: &Value) -> Vec<Analysis> {
    match raw.get("status").and_then(Value::as_str) {
        Some("READY") => analyze_report(raw),
        Some("ERROR") => {
            let message = raw
                .get("statusMessage")
                .and_then(Value::as_str)
                .unwrap_or("Assessment failed");
            [CERTIFICATE, ENCRYPTION]
                .into_iter()
                .map(|scan_type| {
                    Analysis::new(scan_type, "scan_error", Severity::NoInformation, message)
                })
                .collect()
        }
        _ => vec![uninterpretable(CERTIFICATE, raw), uninterpretable(ENCRYPTION, raw)],
    }
}

fn analyze_report(raw: &Value) -> Vec<Analysis> {
    let endpoints: Vec<&Value> = raw
        .get("endpoints")
        .and_then(Value::as_array)
        .map(|e| e.iter().collect())
        .unwrap_or_default();

    // Endpoints the provider could not reach carry no grade and are skipped.
    let graded: Vec<(&str, &str)> = endpoints
        .iter()
        .filter_map(|e| {
            let grade = e.get("grade").and_then(Value::as_str)?;
            let ignoring_trust = e
                .get("gradeTrustIgnored")
                .and_then(Value::as_str)
                .unwrap_or(grade);
            Some((grade, ignoring_trust))
        })
        .collect();

    if graded.is_empty() {
        return vec![uninterpretable(CERTIFICATE, raw), uninterpretable(ENCRYPTION, raw)];
    }
    let evidence = graded
        .iter()
        .map(|(grade, ignoring_trust)| format!("{grade}/{ignoring_trust}"))
        .collect::<Vec<_>>()
        .join(",");

    let untrusted = graded.iter().any(|(grade, _)| *grade == "T");
    let certificate = if untrusted {
        Analysis::new(
            CERTIFICATE,
            "not_trusted",
            Severity::High,
            "Certificate is not trusted",
        )
    } else {
        Analysis::new(CERTIFICATE, "trusted", Severity::Ok, "Certificate is trusted")
    }
    .with_evidence(evidence.clone());

    let worst = graded
        .iter()
        .map(|(_, ignoring_trust)| (grade_severity(ignoring_trust), *ignoring_trust))
        .max_by_key(|(severity, _)| severity.unwrap_or(Severity::most_conservative()));
    let encryption = match worst {
        Some((Some(severity), grade)) => Analysis::new(
            ENCRYPTION,
            grade,
            severity,
            format!("Encryption quality graded {grade}"),
        )
        .with_evidence(evidence),
        _ => uninterpretable(ENCRYPTION, raw),
    };

    vec![certificate, encryption]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trusted_a_grade() {
        let analyses = analyze(&json!({
            "status": "READY",
            "endpoints": [{"ipAddress": "192.0.2.1", "grade": "A+", "gradeTrustIgnored": "A+"}]
        }));
        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0].rating, "trusted");
        assert_eq!(analyses[1].rating, "A+");
        assert_eq!(analyses[1].severity, Severity::Ok);
    }

    #[test]
    fn test_untrusted_uses_trust_ignored_grade_for_encryption() {
        let analyses = analyze(&json!({
            "status": "READY",
            "endpoints": [{"grade": "T", "gradeTrustIgnored": "B"}]
        }));
        assert_eq!(analyses[0].severity, Severity::High);
        assert_eq!(analyses[0].rating, "not_trusted");
        assert_eq!(analyses[1].rating, "B");
        assert_eq!(analyses[1].severity, Severity::Low);
    }

    #[test]
    fn test_worst_endpoint_wins() {
        let analyses = analyze(&json!({
            "status": "READY",
            "endpoints": [
                {"grade": "A"},
                {"grade": "C"},
                {"statusMessage": "Unable to connect to the server"}
            ]
        }));
        assert_eq!(analyses[1].rating, "C");
        assert_eq!(analyses[1].severity, Severity::Medium);
        assert_eq!(analyses[1].evidence, "A/A,C/C");
    }

    #[test]
    fn test_unknown_grade_is_most_conservative() {
        let analyses = analyze(&json!({"status": "READY", "endpoints": [{"grade": "Z"}]}));
        assert_eq!(analyses[1].severity, Severity::High);
        assert_eq!(analyses[1].rating, "uninterpretable");
    }

    #[test]
    fn test_provider_error_has_no_information() {
        let analyses = analyze(&json!({
            "status": "ERROR",
            "statusMessage": "Unable to resolve domain name"
        }));
        assert!(analyses
            .iter()
            .all(|a| a.severity == Severity::NoInformation && a.message == "Unable to resolve domain name"));
    }

    #[test]
    fn test_ready_without_grades_is_uninterpretable() {
        let analyses = analyze(&json!({"status": "READY", "endpoints": []}));
        assert!(analyses.iter().all(|a| a.severity == Severity::High));
    }
}
