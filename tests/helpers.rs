// Shared test helpers for database setup, seeding and scripted collaborators.
//
// Integration tests use a file-backed database so that several connections
// (and therefore several concurrent workers) see the same data.

#![allow(dead_code)] // Each test file uses a different subset

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use scan_fleet::config::Pacing;
use scan_fleet::error_handling::{ProbeError, ProcessingStats, ProviderError};
use scan_fleet::models::{ScanFamily, Target};
use scan_fleet::probes::TargetProbe;
use scan_fleet::provider::{CapacitySnapshot, ProviderResponse, ScanProvider};
use scan_fleet::proxy::{Proxy, ProxyPool};
use scan_fleet::storage::targets::{add_endpoint, add_organization, add_url};
use scan_fleet::storage::{init_db_pool_with_path, run_migrations};
use scan_fleet::ScanContext;

/// A migrated database in a temporary directory. Keep the `TempDir` alive
/// for as long as the pool is used.
pub async fn create_file_pool() -> (TempDir, Arc<SqlitePool>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = init_db_pool_with_path(&dir.path().join("fleet.db"))
        .await
        .expect("Failed to create database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (dir, pool)
}

/// Seeds an organization owning `url`, with one endpoint per `(protocol, port)`.
/// Returns `(url_id, endpoint_ids)`.
pub async fn seed_url(
    pool: &SqlitePool,
    organization: &str,
    country: &str,
    organization_type: &str,
    url: &str,
    endpoints: &[(&str, u16)],
) -> (i64, Vec<i64>) {
    let organization_id = add_organization(pool, organization, country, organization_type)
        .await
        .expect("Failed to insert organization");
    let url_id = add_url(pool, url, &[organization_id])
        .await
        .expect("Failed to insert url");
    let mut endpoint_ids = Vec::new();
    for (protocol, port) in endpoints {
        endpoint_ids.push(
            add_endpoint(pool, url_id, protocol, *port, 4)
                .await
                .expect("Failed to insert endpoint"),
        );
    }
    (url_id, endpoint_ids)
}

/// Every wait shrunk to milliseconds.
pub fn fast_pacing() -> Pacing {
    Pacing {
        proxy_claim_retry: Duration::from_millis(20),
        registration_delay: Duration::from_millis(2),
        capacity_wait: Duration::from_millis(2),
        poll_base_wait: Duration::from_millis(2),
        poll_backoff_increment: Duration::from_millis(1),
        poll_backoff_ceiling: Duration::from_millis(6),
        health_check_attempts: 1,
        health_check_retry_delay: Duration::from_millis(1),
        health_monitor_interval: Duration::from_millis(50),
        ..Pacing::default()
    }
}

/// Provider with plenty of capacity whose scans finish after `polls_until_ready` polls.
///
/// With `contract_after` set, registrations beyond that many answer with a
/// contract violation.
pub struct FakeProvider {
    pub polls_until_ready: usize,
    pub grade: &'static str,
    pub contract_after: Option<usize>,
    pub polls: AtomicUsize,
    pub registrations: AtomicUsize,
}

impl FakeProvider {
    pub fn new(polls_until_ready: usize, grade: &'static str) -> Self {
        Self {
            polls_until_ready,
            grade,
            contract_after: None,
            polls: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
        }
    }

    pub fn with_contract_after(mut self, registrations: usize) -> Self {
        self.contract_after = Some(registrations);
        self
    }
}

#[async_trait]
impl ScanProvider for FakeProvider {
    async fn capacity(&self, _proxy: &Proxy) -> Result<CapacitySnapshot, ProviderError> {
        Ok(CapacitySnapshot {
            max: 25,
            current: 0,
            this_client: 25,
        })
    }

    async fn fetch_content(&self, _proxy: &Proxy) -> Result<Duration, ProviderError> {
        Ok(Duration::from_millis(10))
    }

    async fn register(
        &self,
        _proxy: &Proxy,
        _target: &Target,
    ) -> Result<ProviderResponse, ProviderError> {
        let earlier = self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.contract_after.is_some_and(|limit| earlier >= limit) {
            return Err(ProviderError::Contract("unknown API version".to_string()));
        }
        Ok(ProviderResponse::new(200, json!({"status": "DNS"}).to_string()))
    }

    async fn poll(&self, _proxy: &Proxy, _target: &Target) -> Result<ProviderResponse, ProviderError> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let body = if seen % self.polls_until_ready.max(1) == 0 {
            json!({
                "status": "READY",
                "endpoints": [{"grade": self.grade, "gradeTrustIgnored": self.grade}]
            })
        } else {
            json!({"status": "IN_PROGRESS"})
        };
        Ok(ProviderResponse::new(200, body.to_string()))
    }
}

/// Reports every FTP server as reachable with TLS, every name as resolvable.
pub struct FakeProbe;

#[async_trait]
impl TargetProbe for FakeProbe {
    async fn probe(&self, family: ScanFamily, target: &Target) -> Result<Value, ProbeError> {
        match family {
            ScanFamily::Ftp => Ok(json!({"reachable": true, "supports_tls": true, "banner": "220"})),
            ScanFamily::Dns => Ok(json!({"resolvable": true, "addresses": ["192.0.2.1"]})),
            _ => Err(ProbeError::Failed(format!("{family} not faked for {}", target.host()))),
        }
    }
}

pub fn scan_context(
    pool: Arc<SqlitePool>,
    provider: Arc<dyn ScanProvider>,
    probe: Arc<dyn TargetProbe>,
) -> ScanContext {
    let stats = Arc::new(ProcessingStats::new());
    let pacing = fast_pacing();
    ScanContext {
        proxies: ProxyPool::new(
            Arc::clone(&pool),
            provider,
            pacing.clone(),
            Arc::clone(&stats),
        ),
        pool,
        probe,
        pacing,
        stats,
        claim_limiter: None,
        cancel: CancellationToken::new(),
    }
}
