//! Resolver-backed probes: resolvability and mail policy records.

use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use serde_json::{json, Value};

use crate::error_handling::ProbeError;
use crate::models::Target;

/// True when the lookup failed because the name has no such records (NODATA or NXDOMAIN).
fn is_no_records(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

pub(super) async fn probe_resolvable(
    resolver: &TokioAsyncResolver,
    target: &Target,
) -> Result<Value, ProbeError> {
    match resolver.lookup_ip(target.host()).await {
        Ok(lookup) => {
            let addresses: Vec<String> = lookup.iter().map(|ip| ip.to_string()).collect();
            Ok(json!({"resolvable": !addresses.is_empty(), "addresses": addresses}))
        }
        Err(e) if is_no_records(&e) => Ok(json!({"resolvable": false, "addresses": []})),
        Err(e) => Err(ProbeError::Failed(format!("{}: {e}", target.host()))),
    }
}

/// Looks up TXT records for a domain. A name without TXT records yields an empty list.
async fn lookup_txt_records(
    resolver: &TokioAsyncResolver,
    domain: &str,
) -> Result<Vec<String>, ProbeError> {
    match resolver.lookup(domain, RecordType::TXT).await {
        Ok(lookup) => Ok(lookup
            .iter()
            .filter_map(|rdata| match rdata {
                // A TXT record may be split into several character strings
                RData::TXT(txt) => Some(
                    txt.iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>(),
                ),
                _ => None,
            })
            .collect()),
        Err(e) if is_no_records(&e) => Ok(Vec::new()),
        Err(e) => Err(ProbeError::Failed(format!("TXT {domain}: {e}"))),
    }
}

pub(super) async fn probe_mail(
    resolver: &TokioAsyncResolver,
    target: &Target,
) -> Result<Value, ProbeError> {
    let domain = target.host();
    let dmarc_name = format!("_dmarc.{domain}");
    let (spf, dmarc) = tokio::join!(
        lookup_txt_records(resolver, domain),
        lookup_txt_records(resolver, &dmarc_name)
    );
    Ok(json!({"spf": spf?, "dmarc": dmarc?}))
}
