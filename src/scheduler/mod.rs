//! Batch Scheduler.
//!
//! Targets are cut into fixed-size [`WorkUnit`]s. A unit is self-contained:
//! provider units claim a proxy, register sequentially, poll and release;
//! local units probe their targets directly. Units share nothing but the
//! database, so any number of them can run side by side.

mod batch;

use std::sync::Arc;

use log::{debug, info};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::Pacing;
use crate::error_handling::{DatabaseError, InfoType, ProcessingStats, ScanError};
use crate::initialization::RateLimiter;
use crate::models::{Analysis, FamilyKind, ScanFamily, Severity, Target};
use crate::probes::TargetProbe;
use crate::provider::ScanProvider;
use crate::proxy::ProxyPool;
use crate::storage::{add_scan, had_scan_with_points, AddScanOutcome};

pub(crate) use batch::run_provider_batch;

/// Shared resources handed to every work unit.
#[derive(Clone)]
pub struct ScanContext {
    pub pool: Arc<SqlitePool>,
    pub proxies: ProxyPool,
    pub probe: Arc<dyn TargetProbe>,
    pub pacing: Pacing,
    pub stats: Arc<ProcessingStats>,
    /// Global cap on batch claims; `None` disables it
    pub claim_limiter: Option<Arc<RateLimiter>>,
    pub cancel: CancellationToken,
}

impl ScanContext {
    pub fn provider(&self) -> &Arc<dyn ScanProvider> {
        self.proxies.provider()
    }
}

/// A bounded group of targets of one family, processed as one pipeline.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub family: ScanFamily,
    pub targets: Vec<Target>,
}

impl WorkUnit {
    /// Runs the unit to completion.
    ///
    /// Targets whose processing was interrupted by cancellation are counted
    /// as abandoned rather than failing the unit.
    pub async fn execute(&self, ctx: &ScanContext) -> Result<UnitReport, UnitFailure> {
        debug!("Starting {} unit of {} targets", self.family, self.targets.len());
        match self.family.kind() {
            FamilyKind::Provider => run_provider_batch(ctx, self).await,
            FamilyKind::Local => crate::pipeline::run_local_unit(ctx, self).await,
        }
    }
}

/// Splits `targets` into units of at most `batch_size`, keeping their order.
pub fn partition(family: ScanFamily, targets: Vec<Target>, batch_size: usize) -> Vec<WorkUnit> {
    let batch_size = batch_size.max(1);
    let mut units = Vec::with_capacity(targets.len().div_ceil(batch_size));
    let mut targets = targets.into_iter().peekable();
    while targets.peek().is_some() {
        units.push(WorkUnit {
            family,
            targets: targets.by_ref().take(batch_size).collect(),
        });
    }
    units
}

/// Per-unit (and, summed, per-run) tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitReport {
    /// Targets that reached a result (stored or skipped as uninformative)
    pub targets: usize,
    /// Result rows created
    pub stored: usize,
    /// Result rows whose timestamp was refreshed
    pub refreshed: usize,
    /// Targets that could not be scanned
    pub errored: usize,
    /// Targets dropped on shutdown
    pub abandoned: usize,
}

impl UnitReport {
    pub fn merge(&mut self, other: &UnitReport) {
        self.targets += other.targets;
        self.stored += other.stored;
        self.refreshed += other.refreshed;
        self.errored += other.errored;
        self.abandoned += other.abandoned;
    }

    /// Targets with a known fate.
    pub fn accounted(&self) -> usize {
        self.targets + self.errored + self.abandoned
    }
}

/// A unit that stopped on an error.
///
/// `report` still accounts for every target of the unit: what finished
/// before the error keeps its counts, the rest is errored.
#[derive(Debug, thiserror::Error)]
#[error("work unit stopped: {error}")]
pub struct UnitFailure {
    pub report: UnitReport,
    #[source]
    pub error: ScanError,
}

impl UnitFailure {
    pub(crate) fn new(mut report: UnitReport, unit_size: usize, error: ScanError) -> Self {
        report.errored += unit_size.saturating_sub(report.accounted());
        Self { report, error }
    }
}

/// Persists the analyses of one target.
///
/// `NoInformation` analyses are only kept when the latest stored result had
/// points: that records the target getting better exactly once.
pub(crate) async fn store_analyses(
    pool: &SqlitePool,
    stats: &ProcessingStats,
    target: &Target,
    analyses: &[Analysis],
) -> Result<UnitReport, DatabaseError> {
    let reference = target.reference();
    let mut report = UnitReport {
        targets: 1,
        ..Default::default()
    };
    for analysis in analyses {
        if analysis.severity == Severity::NoInformation
            && !had_scan_with_points(pool, analysis.scan_type, reference).await?
        {
            debug!(
                "{}: skipping uninformative {} result",
                target.address(),
                analysis.scan_type
            );
            continue;
        }
        match add_scan(pool, reference, analysis).await? {
            AddScanOutcome::Created => {
                stats.increment_info(InfoType::RecordCreated);
                info!(
                    "{}: {} is now {} ({})",
                    target.address(),
                    analysis.scan_type,
                    analysis.rating,
                    analysis.severity
                );
                report.stored += 1;
            }
            AddScanOutcome::Refreshed => {
                stats.increment_info(InfoType::RecordRefreshed);
                report.refreshed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointAddress, ScanType};
    use crate::storage::latest_scan;
    use crate::storage::test_helpers::{create_test_pool, seed_https_target};

    fn targets(n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| Target {
                url_id: i as i64 + 1,
                url: format!("host{i}.example.nl"),
                endpoint: None,
                is_dead: false,
                resolvable: true,
            })
            .collect()
    }

    #[test]
    fn test_partition_sizes() {
        let units = partition(ScanFamily::Mail, targets(53), 25);
        let sizes: Vec<usize> = units.iter().map(|u| u.targets.len()).collect();
        assert_eq!(sizes, vec![25, 25, 3]);
        assert_eq!(units[2].targets[0].url, "host50.example.nl");
        assert!(units.iter().all(|u| u.family == ScanFamily::Mail));
    }

    #[test]
    fn test_partition_edge_cases() {
        assert!(partition(ScanFamily::Dns, Vec::new(), 25).is_empty());
        assert_eq!(partition(ScanFamily::Dns, targets(25), 25).len(), 1);
        // A zero batch size still makes progress
        assert_eq!(partition(ScanFamily::Dns, targets(3), 0).len(), 3);
    }

    #[test]
    fn test_unit_failure_counts_unfinished_targets_as_errored() {
        let finished = UnitReport {
            targets: 2,
            stored: 4,
            ..Default::default()
        };
        let failure = UnitFailure::new(
            finished,
            5,
            ScanError::Panicked("registration loop".to_string()),
        );
        assert_eq!(failure.report.targets, 2);
        assert_eq!(failure.report.stored, 4);
        assert_eq!(failure.report.errored, 3);
        assert_eq!(failure.report.accounted(), 5);
    }

    #[test]
    fn test_unit_report_merge() {
        let mut total = UnitReport::default();
        total.merge(&UnitReport {
            targets: 2,
            stored: 3,
            refreshed: 1,
            errored: 0,
            abandoned: 1,
        });
        total.merge(&UnitReport {
            errored: 2,
            ..Default::default()
        });
        assert_eq!(total.targets, 2);
        assert_eq!(total.stored, 3);
        assert_eq!(total.errored, 2);
        assert_eq!(total.abandoned, 1);
    }

    #[tokio::test]
    async fn test_no_information_only_stored_after_points() {
        let pool = create_test_pool().await;
        let stats = ProcessingStats::new();
        let (_, url_id, endpoint_id) =
            seed_https_target(&pool, "Org", "NL", "municipality", "example.nl").await;
        let target = Target {
            url_id,
            url: "example.nl".to_string(),
            endpoint: Some(EndpointAddress {
                id: endpoint_id,
                protocol: "ftp".to_string(),
                port: 21,
                ip_version: 4,
            }),
            is_dead: false,
            resolvable: true,
        };
        let gone = Analysis::new(
            ScanType::Ftp,
            "not_reachable",
            Severity::NoInformation,
            "FTP server not reachable",
        );

        let report = store_analyses(&pool, &stats, &target, &[gone.clone()])
            .await
            .unwrap();
        assert_eq!(report.stored, 0);
        assert!(latest_scan(&pool, ScanType::Ftp, target.reference())
            .await
            .unwrap()
            .is_none());

        let insecure = Analysis::new(ScanType::Ftp, "insecure", Severity::High, "No TLS");
        store_analyses(&pool, &stats, &target, &[insecure]).await.unwrap();
        let report = store_analyses(&pool, &stats, &target, &[gone]).await.unwrap();
        assert_eq!(report.stored, 1);
        let latest = latest_scan(&pool, ScanType::Ftp, target.reference())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.rating, "not_reachable");
        assert_eq!(stats.get_info_count(InfoType::RecordCreated), 2);
    }
}
