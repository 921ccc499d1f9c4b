//! Claim / release / health operations over the proxy table.

use std::sync::Arc;

use log::{debug, error, info, warn};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Pacing;
use crate::error_handling::{DatabaseError, InfoType, ProcessingStats, ScanError};
use crate::provider::ScanProvider;
use crate::storage::proxies;
use crate::utils::sleep_or_cancel;

use super::health::check_health;
use super::{Proxy, ProxyHealth};

/// Handle to the shared proxy pool.
///
/// Cheap to clone; all state lives in the database.
#[derive(Clone)]
pub struct ProxyPool {
    pool: Arc<SqlitePool>,
    provider: Arc<dyn ScanProvider>,
    pacing: Pacing,
    stats: Arc<ProcessingStats>,
}

impl ProxyPool {
    pub fn new(
        pool: Arc<SqlitePool>,
        provider: Arc<dyn ScanProvider>,
        pacing: Pacing,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        Self {
            pool,
            provider,
            pacing,
            stats,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ScanProvider> {
        &self.provider
    }

    /// Claims the fastest healthy proxy, waiting as long as it takes.
    ///
    /// The claim flag is set before the live check. A proxy that fails the
    /// check is marked dead and released, and the next attempt follows after
    /// `proxy_claim_retry`. When nothing is claimable the call keeps retrying
    /// at the same interval; only cancellation ends the wait
    /// (`ScanError::Cancelled`).
    pub async fn claim(&self, cancel: &CancellationToken) -> Result<Proxy, ScanError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let Some(candidate) = proxies::select_claim_candidate(&self.pool).await? else {
                info!(
                    "No proxy available, retrying in {}s",
                    self.pacing.proxy_claim_retry.as_secs()
                );
                self.wait_before_retry(cancel).await?;
                continue;
            };

            if !proxies::try_claim(&self.pool, candidate.id).await? {
                debug!("Lost the claim race for {candidate}");
                continue;
            }

            match check_health(&self.pool, self.provider.as_ref(), &self.pacing, &self.stats, &candidate).await {
                Ok(ProxyHealth::Healthy { .. }) => {
                    let Some(claimed) = proxies::get_proxy(&self.pool, candidate.id).await? else {
                        continue;
                    };
                    self.stats.increment_info(InfoType::ProxyClaimed);
                    info!("Claimed {claimed}");
                    return Ok(claimed);
                }
                Ok(ProxyHealth::Busy { .. }) => {
                    self.release(&candidate).await?;
                }
                Ok(ProxyHealth::Dead { .. }) => {
                    self.release(&candidate).await?;
                    self.wait_before_retry(cancel).await?;
                }
                Err(e) => {
                    self.release(&candidate).await?;
                    return Err(e);
                }
            }
        }
    }

    async fn wait_before_retry(&self, cancel: &CancellationToken) -> Result<(), ScanError> {
        if sleep_or_cancel(self.pacing.proxy_claim_retry, cancel).await {
            Ok(())
        } else {
            Err(ScanError::Cancelled)
        }
    }

    /// Clears the claim flag. Safe to call on a proxy that is not claimed.
    pub async fn release(&self, proxy: &Proxy) -> Result<(), DatabaseError> {
        proxies::release(&self.pool, proxy.id).await?;
        debug!("Released {proxy}");
        Ok(())
    }

    /// Checks `proxy` now and records the outcome.
    pub async fn check_health(&self, proxy: &Proxy) -> Result<ProxyHealth, ScanError> {
        check_health(&self.pool, self.provider.as_ref(), &self.pacing, &self.stats, proxy).await
    }

    /// Takes a proxy out of the pool after it failed mid-batch.
    pub async fn mark_dead(&self, proxy: &Proxy, reason: &str) -> Result<(), DatabaseError> {
        warn!("Marking {proxy} dead: {reason}");
        proxies::mark_dead(&self.pool, proxy.id, reason).await
    }

    /// Checks every enabled proxy that is not currently claimed.
    ///
    /// Dead proxies that answer again are revived and busy proxies that have
    /// capacity again become claimable.
    pub async fn check_all(&self) -> Result<Vec<(Proxy, ProxyHealth)>, ScanError> {
        let mut results = Vec::new();
        for proxy in proxies::list_proxies(&self.pool).await? {
            if proxy.manually_disabled || proxy.currently_in_use {
                continue;
            }
            let health = self.check_health(&proxy).await?;
            results.push((proxy, health));
        }
        let usable = results.iter().filter(|(_, h)| h.is_usable()).count();
        info!("Proxy pool check: {usable}/{} usable", results.len());
        Ok(results)
    }

    /// Runs `check_all` every `health_monitor_interval` until `cancel` fires.
    pub fn spawn_health_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = pool.check_all().await {
                    error!("Proxy pool health check failed: {e}");
                }
                if !sleep_or_cancel(pool.pacing.health_monitor_interval, &cancel).await {
                    debug!("Proxy health monitor shutting down");
                    break;
                }
            }
        })
    }

    /// Registers a proxy (or updates the protocol of a known address). Returns its id.
    pub async fn add_proxy(&self, address: &str, protocol: &str) -> Result<i64, DatabaseError> {
        let id = proxies::insert_proxy(&self.pool, address, protocol).await?;
        info!("Added proxy #{id} ({address})");
        Ok(id)
    }

    pub async fn set_manually_disabled(
        &self,
        proxy_id: i64,
        disabled: bool,
    ) -> Result<bool, DatabaseError> {
        proxies::set_manually_disabled(&self.pool, proxy_id, disabled).await
    }

    /// Clears every claim flag. Only safe while no batch is running.
    pub async fn release_all_claims(&self) -> Result<u64, DatabaseError> {
        let released = proxies::release_all(&self.pool).await?;
        if released > 0 {
            warn!("Released {released} stale proxy claims");
        }
        Ok(released)
    }

    pub async fn list(&self) -> Result<Vec<Proxy>, DatabaseError> {
        proxies::list_proxies(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error_handling::{ErrorType, ProviderError, TransportError};
    use crate::models::Target;
    use crate::provider::{CapacitySnapshot, ProviderResponse};
    use crate::storage::test_helpers::{create_test_pool, seed_proxy};

    const ROOMY: CapacitySnapshot = CapacitySnapshot {
        max: 25,
        current: 0,
        this_client: 25,
    };

    /// Answers capacity calls from a per-proxy script; the last entry repeats.
    #[derive(Default)]
    struct ScriptedHealth {
        capacity: Mutex<Vec<(String, VecDeque<Result<CapacitySnapshot, ProviderError>>)>>,
        capacity_calls: Mutex<usize>,
    }

    impl ScriptedHealth {
        fn script(self, address: &str, answers: Vec<Result<CapacitySnapshot, ProviderError>>) -> Self {
            self.capacity
                .lock()
                .unwrap()
                .push((address.to_string(), answers.into()));
            self
        }
    }

    fn clone_result(
        r: &Result<CapacitySnapshot, ProviderError>,
    ) -> Result<CapacitySnapshot, ProviderError> {
        match r {
            Ok(c) => Ok(*c),
            Err(ProviderError::Transport(t)) => Err(ProviderError::Transport(t.clone())),
            Err(ProviderError::Contract(m)) => Err(ProviderError::Contract(m.clone())),
            Err(ProviderError::Overloaded(m)) => Err(ProviderError::Overloaded(m.clone())),
        }
    }

    #[async_trait]
    impl ScanProvider for ScriptedHealth {
        async fn capacity(&self, proxy: &Proxy) -> Result<CapacitySnapshot, ProviderError> {
            *self.capacity_calls.lock().unwrap() += 1;
            let mut scripts = self.capacity.lock().unwrap();
            let Some((_, answers)) = scripts.iter_mut().find(|(a, _)| *a == proxy.address) else {
                return Ok(ROOMY);
            };
            if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                clone_result(answers.front().unwrap())
            }
        }

        async fn fetch_content(&self, _proxy: &Proxy) -> Result<Duration, ProviderError> {
            Ok(Duration::from_millis(42))
        }

        async fn register(&self, _: &Proxy, _: &Target) -> Result<ProviderResponse, ProviderError> {
            unreachable!("health checks never register scans")
        }

        async fn poll(&self, _: &Proxy, _: &Target) -> Result<ProviderResponse, ProviderError> {
            unreachable!("health checks never poll")
        }
    }

    fn fast_pacing() -> Pacing {
        Pacing {
            proxy_claim_retry: Duration::from_millis(20),
            health_check_retry_delay: Duration::from_millis(1),
            ..Pacing::default()
        }
    }

    async fn proxy_pool(provider: Arc<dyn ScanProvider>) -> (ProxyPool, Arc<ProcessingStats>) {
        let pool = Arc::new(create_test_pool().await);
        let stats = Arc::new(ProcessingStats::new());
        (
            ProxyPool::new(pool, provider, fast_pacing(), Arc::clone(&stats)),
            stats,
        )
    }

    #[tokio::test]
    async fn test_small_provider_capacity_is_alive_not_dead() {
        let provider = ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Ok(CapacitySnapshot {
                max: 10,
                current: 5,
                this_client: 30,
            })],
        );
        let (pool, _) = proxy_pool(Arc::new(provider)).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;
        let proxy = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();

        let health = pool.check_health(&proxy).await.unwrap();
        assert!(matches!(health, ProxyHealth::Busy { .. }));

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(!stored.is_dead);
        assert_eq!(stored.capacity.map(|c| c.current), Some(5));
    }

    #[tokio::test]
    async fn test_ssl_failure_marks_dead_without_retrying() {
        let provider = ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Err(TransportError::Tls("handshake failure".to_string()).into())],
        );
        let (pool, stats) = proxy_pool(Arc::new(provider)).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;
        let proxy = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();

        let health = pool.check_health(&proxy).await.unwrap();
        assert!(health.is_dead());

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(stored.is_dead);
        assert_eq!(stats.get_error_count(ErrorType::ProxyMarkedDead), 1);
    }

    #[tokio::test]
    async fn test_network_errors_are_retried_a_bounded_number_of_times() {
        let provider = Arc::new(ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Err(TransportError::Connect("refused".to_string()).into())],
        ));
        let (pool, _) = proxy_pool(provider.clone()).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;
        let proxy = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();

        let health = pool.check_health(&proxy).await.unwrap();
        assert!(health.is_dead());
        assert_eq!(*provider.capacity_calls.lock().unwrap(), 3);

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(stored.is_dead);
    }

    #[tokio::test]
    async fn test_recovers_from_a_single_network_blip() {
        let provider = ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Err(TransportError::Timeout("slow".to_string()).into()), Ok(ROOMY)],
        );
        let (pool, _) = proxy_pool(Arc::new(provider)).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;
        let proxy = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();

        assert!(pool.check_health(&proxy).await.unwrap().is_usable());
    }

    #[tokio::test]
    async fn test_overloaded_provider_is_busy_not_dead() {
        let provider = Arc::new(ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Err(ProviderError::Overloaded("HTTP 529".to_string()))],
        ));
        let (pool, stats) = proxy_pool(provider.clone()).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;
        let proxy = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();

        let health = pool.check_health(&proxy).await.unwrap();
        assert_eq!(health, ProxyHealth::Busy { capacity: None });
        assert_eq!(*provider.capacity_calls.lock().unwrap(), 1);
        assert_eq!(stats.get_error_count(ErrorType::ProxyBusy), 1);

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(!stored.is_dead);
        assert!(stored.out_of_capacity);
    }

    #[tokio::test]
    async fn test_unavailable_info_page_keeps_claim_waiting() {
        use crate::config::ProviderEndpoints;
        use crate::provider::SslLabsClient;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // The mock server plays the proxy; requests arrive in absolute form
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/info"))
            .respond_with(
                ResponseTemplate::new(503).set_body_string("<html>Service Unavailable</html>"),
            )
            .mount(&server)
            .await;
        let client = SslLabsClient::shared(
            ProviderEndpoints {
                api_url: "http://provider.test/api/v3".to_string(),
                content_url: "http://provider.test/".to_string(),
            },
            fast_pacing(),
            "scan_fleet-test",
        );
        let (pool, _) = proxy_pool(client).await;
        let id = seed_proxy(&pool.pool, &server.address().to_string(), None).await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });
        let result = pool.claim(&cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(!stored.is_dead);
        assert!(stored.out_of_capacity);
        assert!(!stored.currently_in_use);
        assert_eq!(stored.check_result.as_deref(), Some("overloaded"));
    }

    #[tokio::test]
    async fn test_contract_error_surfaces_and_releases() {
        let provider = ScriptedHealth::default().script(
            "10.0.0.1:3128",
            vec![Err(ProviderError::Contract("no maxAssessments".to_string()))],
        );
        let (pool, _) = proxy_pool(Arc::new(provider)).await;
        let id = seed_proxy(&pool.pool, "10.0.0.1:3128", None).await;

        let result = pool.claim(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::Provider(ProviderError::Contract(_)))));

        let stored = proxies::get_proxy(&pool.pool, id).await.unwrap().unwrap();
        assert!(!stored.currently_in_use);
        assert!(!stored.is_dead);
    }

    #[tokio::test]
    async fn test_claim_skips_dead_proxy_and_takes_next() {
        let provider = ScriptedHealth::default().script(
            "fast:1",
            vec![Err(TransportError::Tls("bad".to_string()).into())],
        );
        let (pool, _) = proxy_pool(Arc::new(provider)).await;
        seed_proxy(&pool.pool, "fast:1", Some(10)).await;
        let slow = seed_proxy(&pool.pool, "slow:1", Some(500)).await;

        let claimed = pool.claim(&CancellationToken::new()).await.unwrap();
        assert_eq!(claimed.id, slow);
        assert!(claimed.currently_in_use);
        assert_eq!(claimed.request_speed_ms, Some(42));
    }

    #[tokio::test]
    async fn test_release_then_claim_reselects_same_proxy() {
        let (pool, _) = proxy_pool(Arc::new(ScriptedHealth::default())).await;
        let id = seed_proxy(&pool.pool, "only:1", None).await;
        let cancel = CancellationToken::new();

        let first = pool.claim(&cancel).await.unwrap();
        assert_eq!(first.id, id);
        pool.release(&first).await.unwrap();

        let second = pool.claim(&cancel).await.unwrap();
        assert_eq!(second.id, id);
    }

    #[tokio::test]
    async fn test_claim_waits_until_cancelled_when_pool_is_empty() {
        let (pool, _) = proxy_pool(Arc::new(ScriptedHealth::default())).await;
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = pool.claim(&cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_check_all_revives_and_skips_disabled() {
        let (pool, _) = proxy_pool(Arc::new(ScriptedHealth::default())).await;
        let revived = seed_proxy(&pool.pool, "a:1", None).await;
        let disabled = seed_proxy(&pool.pool, "b:1", None).await;
        proxies::mark_dead(&pool.pool, revived, "earlier failure").await.unwrap();
        pool.set_manually_disabled(disabled, true).await.unwrap();

        let results = pool.check_all().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, revived);
        assert!(results[0].1.is_usable());

        let stored = proxies::get_proxy(&pool.pool, revived).await.unwrap().unwrap();
        assert!(!stored.is_dead);
    }

    #[tokio::test]
    async fn test_health_monitor_stops_on_cancel() {
        let (pool, _) = proxy_pool(Arc::new(ScriptedHealth::default())).await;
        seed_proxy(&pool.pool, "a:1", None).await;
        let cancel = CancellationToken::new();

        let handle = pool.spawn_health_monitor(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
