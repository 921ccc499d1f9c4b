//! scan_fleet library: scan orchestration through a pool of egress proxies
//!
//! This library selects scan targets from a SQLite target store, cuts them
//! into work units and runs every unit to completion: provider-backed
//! families claim a proxy, register scans with a rate-limited remote provider
//! and poll them to a terminal state; local families probe targets directly.
//! Results are analyzed into a common severity scale and stored with
//! change-only history.
//!
//! # Example
//!
//! ```no_run
//! use scan_fleet::capabilities::ScopeEntry;
//! use scan_fleet::targets::TargetFilters;
//! use scan_fleet::{run_scan, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     scope: vec![ScopeEntry::new("NL", "municipality")],
//!     ..Default::default()
//! };
//!
//! let report = run_scan(config, TargetFilters::default(), CancellationToken::new()).await?;
//! println!("{} targets scanned, {} results changed", report.targets, report.stored);
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime.

pub mod analyzers;
pub mod capabilities;
pub mod config;
pub mod error_handling;
pub mod initialization;
pub mod models;
mod pipeline;
pub mod polling;
pub mod probes;
pub mod provider;
pub mod proxy;
pub mod scheduler;
pub mod storage;
pub mod targets;
mod utils;

// Re-export public API
pub use config::{Config, LogFormat, LogLevel, Opt};
pub use run::{compose_scan, run_scan, run_work_units, ScanReport};
pub use scheduler::{partition, ScanContext, UnitFailure, UnitReport, WorkUnit};

mod run {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::{Context, Result};
    use chrono::Utc;
    use futures::stream::FuturesUnordered;
    use futures::StreamExt;
    use log::{debug, error, info, warn};
    use serde::Serialize;
    use sqlx::SqlitePool;
    use tokio_util::sync::CancellationToken;

    use crate::capabilities::{CapabilityOracle, ScopeLevel, StaticCapabilities};
    use crate::config::{Config, LOGGING_INTERVAL, SCRATCHPAD_RETENTION_DAYS};
    use crate::error_handling::{print_error_statistics, DatabaseError, ErrorType, ProcessingStats, ScanError};
    use crate::initialization::{init_claim_rate_limiter, init_semaphore};
    use crate::models::{FamilyKind, ScanFamily};
    use crate::probes::NetworkProbe;
    use crate::provider::{ScanProvider, SslLabsClient};
    use crate::proxy::ProxyPool;
    use crate::scheduler::{partition, ScanContext, UnitReport, WorkUnit};
    use crate::storage::{init_db_pool_with_path, run_migrations, scratchpad};
    use crate::targets::{select_targets, TargetFilters};

    /// Results of a scan run.
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct ScanReport {
        /// Work units executed
        pub units: usize,
        /// Targets that produced a result
        pub targets: usize,
        /// Result rows created (a rating changed or appeared)
        pub stored: usize,
        /// Result rows confirmed unchanged
        pub refreshed: usize,
        /// Targets that could not be scanned
        pub errored: usize,
        /// Targets dropped on shutdown
        pub abandoned: usize,
        /// Elapsed time in seconds
        pub elapsed_seconds: f64,
    }

    impl ScanReport {
        fn absorb(&mut self, unit: &UnitReport) {
            self.targets += unit.targets;
            self.stored += unit.stored;
            self.refreshed += unit.refreshed;
            self.errored += unit.errored;
            self.abandoned += unit.abandoned;
        }
    }

    /// Builds the work units of every enabled family.
    ///
    /// Each family selects its targets within the scope the oracle grants;
    /// resolvability checks use the verification scope, scans the scan scope.
    pub async fn compose_scan(
        oracle: &dyn CapabilityOracle,
        pool: &SqlitePool,
        filters: &TargetFilters,
        batch_size: usize,
    ) -> Result<Vec<WorkUnit>, DatabaseError> {
        let mut units = Vec::new();
        for family in ScanFamily::all() {
            if !oracle.is_scan_type_enabled(family) {
                debug!("{family} is disabled");
                continue;
            }
            let level = match family {
                ScanFamily::Dns => ScopeLevel::Verification,
                _ => ScopeLevel::Scan,
            };
            let targets = select_targets(pool, family, filters, &oracle.scan_scope(level)).await?;
            let family_units = partition(family, targets, batch_size);
            info!("{family}: {} work units", family_units.len());
            units.extend(family_units);
        }
        Ok(units)
    }

    /// Runs `units` on a bounded worker pool and sums their reports.
    ///
    /// A failing or panicking unit is counted against its own targets only;
    /// its siblings keep running.
    pub async fn run_work_units(
        ctx: &ScanContext,
        units: Vec<WorkUnit>,
        max_concurrency: usize,
    ) -> Result<ScanReport> {
        let start_time = Instant::now();
        let semaphore = init_semaphore(max_concurrency);
        let total_units = units.len();
        let completed_units = Arc::new(AtomicUsize::new(0));

        let stop_logging = CancellationToken::new();
        let logging_task = {
            let completed = Arc::clone(&completed_units);
            let stop = stop_logging.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(LOGGING_INTERVAL));
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            info!(
                                "Completed {}/{total_units} work units in {:.0}s",
                                completed.load(Ordering::SeqCst),
                                start_time.elapsed().as_secs_f64()
                            );
                        }
                        _ = stop.cancelled() => break,
                    }
                }
            })
        };

        let mut tasks = FuturesUnordered::new();
        for unit in units {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Worker pool semaphore closed")?;
            let ctx = ctx.clone();
            let completed = Arc::clone(&completed_units);
            let size = unit.targets.len();
            let family = unit.family;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = unit.execute(&ctx).await;
                completed.fetch_add(1, Ordering::SeqCst);
                result
            });
            tasks.push(async move { (family, size, handle.await) });
        }

        let mut report = ScanReport {
            units: total_units,
            ..Default::default()
        };
        while let Some((family, size, joined)) = tasks.next().await {
            match joined {
                Ok(Ok(unit_report)) => report.absorb(&unit_report),
                Ok(Err(failure)) => {
                    if !matches!(failure.error, ScanError::Cancelled) {
                        ctx.stats.increment_error(ErrorType::UnitFailed);
                        error!(
                            "{family} unit of {size} targets failed after {} finished: {}",
                            failure.report.targets, failure.error
                        );
                    }
                    report.absorb(&failure.report);
                }
                Err(join_error) => {
                    ctx.stats.increment_error(ErrorType::UnitPanicked);
                    error!("{family} unit of {size} targets panicked: {join_error}");
                    report.errored += size;
                }
            }
        }

        stop_logging.cancel();
        let _ = logging_task.await;

        report.elapsed_seconds = start_time.elapsed().as_secs_f64();
        Ok(report)
    }

    /// Runs a complete scan with the provided configuration.
    ///
    /// Opens (and migrates) the database, composes the work units allowed by
    /// the configured families and scope, and runs them until done or until
    /// `cancel` fires. Cancellation drops in-flight results; every claimed
    /// proxy is still released.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or the network resources cannot be
    /// initialized. Failures of individual units are only counted.
    pub async fn run_scan(
        config: Config,
        filters: TargetFilters,
        cancel: CancellationToken,
    ) -> Result<ScanReport> {
        let pool = init_db_pool_with_path(&config.db_path)
            .await
            .context("Failed to initialize database pool")?;
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let stats = Arc::new(ProcessingStats::new());
        let provider: Arc<dyn ScanProvider> = SslLabsClient::shared(
            config.provider.clone(),
            config.pacing.clone(),
            &config.user_agent,
        );
        let proxies = ProxyPool::new(
            Arc::clone(&pool),
            provider,
            config.pacing.clone(),
            Arc::clone(&stats),
        );
        for address in &config.proxies {
            proxies
                .add_proxy(address, "http")
                .await
                .with_context(|| format!("Failed to add proxy {address}"))?;
        }
        if config.release_stale_claims {
            proxies
                .release_all_claims()
                .await
                .context("Failed to release stale proxy claims")?;
        }
        let known = proxies.list().await.context("Failed to list proxies")?;
        info!(
            "{} proxies known, {} dead, {} disabled",
            known.len(),
            known.iter().filter(|p| p.is_dead).count(),
            known.iter().filter(|p| p.manually_disabled).count()
        );
        let probe = NetworkProbe::from_defaults(&config.user_agent)
            .context("Failed to initialize local probes")?;

        let (claim_limiter, limiter_shutdown) =
            match init_claim_rate_limiter(config.claims_per_minute, config.max_concurrency) {
                Some((limiter, shutdown)) => (Some(limiter), Some(shutdown)),
                None => (None, None),
            };

        let oracle = StaticCapabilities::from_config(&config);
        let units = compose_scan(&oracle, &pool, &filters, config.batch_size)
            .await
            .context("Failed to compose work units")?;
        info!("Composed {} work units", units.len());

        let monitor_cancel = cancel.child_token();
        let monitor = units
            .iter()
            .any(|unit| unit.family.kind() == FamilyKind::Provider)
            .then(|| proxies.spawn_health_monitor(monitor_cancel.clone()));

        let ctx = ScanContext {
            pool: Arc::clone(&pool),
            proxies,
            probe: Arc::new(probe),
            pacing: config.pacing.clone(),
            stats: Arc::clone(&stats),
            claim_limiter,
            cancel: cancel.clone(),
        };
        let report = run_work_units(&ctx, units, config.max_concurrency).await;

        monitor_cancel.cancel();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        if let Some(shutdown) = limiter_shutdown {
            shutdown.cancel();
        }

        let cutoff = Utc::now() - chrono::Duration::days(SCRATCHPAD_RETENTION_DAYS);
        match scratchpad::prune_older_than(&pool, cutoff.timestamp_millis()).await {
            Ok(pruned) if pruned > 0 => debug!("Pruned {pruned} scratchpad entries"),
            Ok(_) => {}
            Err(e) => warn!("Failed to prune the scratchpad: {e}"),
        }

        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(pool.as_ref())
            .await
        {
            warn!("Failed to checkpoint WAL file (this is non-critical): {e}");
        }

        print_error_statistics(&stats);
        report
    }
}
