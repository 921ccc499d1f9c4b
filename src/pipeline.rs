//! Local work units: probe each target directly, analyze, store.
//!
//! Probing doubles as verification. The DNS family keeps url resolvability
//! up to date, and endpoints that stop answering are marked dead.

use log::{debug, info, warn};
use serde_json::Value;

use crate::error_handling::{ErrorType, InfoType, ProbeError, ScanError};
use crate::models::{Analysis, ScanFamily, Severity, Target};
use crate::scheduler::{store_analyses, ScanContext, UnitFailure, UnitReport, WorkUnit};
use crate::storage::targets::{set_endpoint_alive, set_url_resolvable};

pub(crate) async fn run_local_unit(
    ctx: &ScanContext,
    unit: &WorkUnit,
) -> Result<UnitReport, UnitFailure> {
    let mut report = UnitReport::default();
    for (index, target) in unit.targets.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            report.abandoned += unit.targets.len() - index;
            break;
        }
        let result = tokio::select! {
            result = scan_target(ctx, unit.family, target) => result,
            _ = ctx.cancel.cancelled() => {
                report.abandoned += unit.targets.len() - index;
                break;
            }
        };
        match result {
            Ok(target_report) => report.merge(&target_report),
            Err(e) => return Err(UnitFailure::new(report, unit.targets.len(), e)),
        }
    }
    Ok(report)
}

async fn scan_target(
    ctx: &ScanContext,
    family: ScanFamily,
    target: &Target,
) -> Result<UnitReport, ScanError> {
    match ctx.probe.probe(family, target).await {
        Ok(raw) => {
            if family == ScanFamily::Dns {
                update_resolvability(ctx, target, &raw).await?;
            }
            let analyses = family.analyze(&raw);
            Ok(store_analyses(&ctx.pool, &ctx.stats, target, &analyses).await?)
        }
        Err(ProbeError::Unreachable(reason)) | Err(ProbeError::Unresolvable(reason)) => {
            ctx.stats.increment_error(ErrorType::ProbeUnreachable);
            debug!("{} unreachable: {reason}", target.address());
            mark_gone(ctx, target).await?;
            let analyses = unreachable_analyses(family);
            Ok(store_analyses(&ctx.pool, &ctx.stats, target, &analyses).await?)
        }
        Err(ProbeError::Failed(reason)) => {
            ctx.stats.increment_error(ErrorType::ProbeFailed);
            warn!("{family} probe of {} failed: {reason}", target.address());
            Ok(UnitReport {
                errored: 1,
                ..Default::default()
            })
        }
    }
}

async fn update_resolvability(
    ctx: &ScanContext,
    target: &Target,
    raw: &Value,
) -> Result<(), ScanError> {
    let Some(resolvable) = raw.get("resolvable").and_then(Value::as_bool) else {
        return Ok(());
    };
    if set_url_resolvable(&ctx.pool, target.url_id, resolvable).await? {
        ctx.stats.increment_info(InfoType::ResolvabilityChanged);
        info!(
            "{} is {} resolvable",
            target.host(),
            if resolvable { "again" } else { "no longer" }
        );
    }
    Ok(())
}

/// Marks an endpoint dead, or a url unresolvable, after it stopped answering.
async fn mark_gone(ctx: &ScanContext, target: &Target) -> Result<(), ScanError> {
    let changed = match &target.endpoint {
        Some(endpoint) => set_endpoint_alive(&ctx.pool, endpoint.id, false).await?,
        None => set_url_resolvable(&ctx.pool, target.url_id, false).await?,
    };
    if changed {
        ctx.stats.increment_info(InfoType::TargetMarkedDead);
        info!("{} marked dead", target.address());
    }
    Ok(())
}

/// "Nothing to say anymore" for every type of the family. Only stored where
/// the target previously had findings.
fn unreachable_analyses(family: ScanFamily) -> Vec<Analysis> {
    family
        .scan_types()
        .iter()
        .map(|scan_type| {
            Analysis::new(
                *scan_type,
                "not_reachable",
                Severity::NoInformation,
                "Target is no longer reachable",
            )
        })
        .collect()
}
