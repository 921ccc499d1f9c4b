//! HTTP implementation of [`ScanProvider`] for an SSL Labs v3 style API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;

use crate::config::{Pacing, ProviderEndpoints};
use crate::error_handling::{categorize_reqwest_error, ProviderError, TransportError};
use crate::initialization::init_proxy_client;
use crate::models::Target;
use crate::proxy::Proxy;

use super::{interpret_info, CapacitySnapshot, ProviderResponse, ScanProvider};

/// Client for the remote assessment API.
///
/// One `reqwest::Client` is built lazily per proxy and reused for every call
/// through that proxy.
pub struct SslLabsClient {
    endpoints: ProviderEndpoints,
    pacing: Pacing,
    user_agent: String,
    clients: Mutex<HashMap<i64, reqwest::Client>>,
}

impl SslLabsClient {
    pub fn new(endpoints: ProviderEndpoints, pacing: Pacing, user_agent: &str) -> Self {
        Self {
            endpoints,
            pacing,
            user_agent: user_agent.to_string(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(endpoints: ProviderEndpoints, pacing: Pacing, user_agent: &str) -> Arc<Self> {
        Arc::new(Self::new(endpoints, pacing, user_agent))
    }

    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client, ProviderError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ProviderError::Contract("proxy client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&proxy.id) {
            return Ok(client.clone());
        }
        let client = init_proxy_client(proxy, &self.pacing, &self.user_agent).map_err(|e| {
            TransportError::ProxyProtocol(format!("cannot build client for {}: {e}", proxy.address))
        })?;
        clients.insert(proxy.id, client.clone());
        Ok(client)
    }

    fn info_url(&self) -> String {
        format!("{}/info", self.endpoints.api_url.trim_end_matches('/'))
    }

    fn analyze_url(&self) -> String {
        format!("{}/analyze", self.endpoints.api_url.trim_end_matches('/'))
    }

    async fn get(
        &self,
        proxy: &Proxy,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<ProviderResponse, ProviderError> {
        let client = self.client_for(proxy)?;
        let response = client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| categorize_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| categorize_reqwest_error(&e))?;
        debug!("{url} via {} -> {status}", proxy.address);
        Ok(ProviderResponse::new(status, raw))
    }
}

/// Query parameters for registering (`start_new`) or polling an assessment.
pub(crate) fn analyze_query(host: &str, start_new: bool) -> Vec<(&str, &str)> {
    let mut query = vec![("host", host), ("publish", "off")];
    if start_new {
        query.push(("startNew", "on"));
    }
    query.push(("all", "done"));
    query.push(("ignoreMismatch", "on"));
    query
}

#[async_trait]
impl ScanProvider for SslLabsClient {
    async fn capacity(&self, proxy: &Proxy) -> Result<CapacitySnapshot, ProviderError> {
        let response = self.get(proxy, &self.info_url(), &[]).await?;
        interpret_info(response.http_status, &response.body)
    }

    async fn fetch_content(&self, proxy: &Proxy) -> Result<Duration, ProviderError> {
        let started = Instant::now();
        let response = self.get(proxy, &self.endpoints.content_url, &[]).await?;
        if !(200..400).contains(&response.http_status) {
            return Err(TransportError::Other(format!(
                "content page returned HTTP {}",
                response.http_status
            ))
            .into());
        }
        Ok(started.elapsed())
    }

    async fn register(
        &self,
        proxy: &Proxy,
        target: &Target,
    ) -> Result<ProviderResponse, ProviderError> {
        self.get(proxy, &self.analyze_url(), &analyze_query(target.host(), true))
            .await
    }

    async fn poll(&self, proxy: &Proxy, target: &Target) -> Result<ProviderResponse, ProviderError> {
        self.get(proxy, &self.analyze_url(), &analyze_query(target.host(), false))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls_tolerate_trailing_slash() {
        let client = SslLabsClient::new(
            ProviderEndpoints {
                api_url: "https://api.example.test/api/v3/".to_string(),
                content_url: "https://www.example.test/".to_string(),
            },
            Pacing::default(),
            "test-agent",
        );
        assert_eq!(client.info_url(), "https://api.example.test/api/v3/info");
        assert_eq!(client.analyze_url(), "https://api.example.test/api/v3/analyze");
    }

    #[test]
    fn test_register_and_poll_queries_differ_only_in_start_new() {
        let register = analyze_query("example.nl", true);
        let poll = analyze_query("example.nl", false);
        assert!(register.contains(&("startNew", "on")));
        assert!(!poll.iter().any(|(k, _)| *k == "startNew"));
        assert_eq!(register.len(), poll.len() + 1);
        assert!(poll.contains(&("host", "example.nl")));
    }

    #[test]
    fn test_clients_are_cached_per_proxy() {
        let client = SslLabsClient::new(ProviderEndpoints::default(), Pacing::default(), "agent");
        let proxy = Proxy::for_test(1, "127.0.0.1:3128");
        client.client_for(&proxy).unwrap();
        client.client_for(&proxy).unwrap();
        assert_eq!(client.clients.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_info_error_pages_through_proxy() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let proxy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/info"))
            .respond_with(
                ResponseTemplate::new(503).set_body_string("<html>Service Unavailable</html>"),
            )
            .mount(&proxy_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Login required</html>"))
            .mount(&proxy_server)
            .await;
        let proxy = Proxy::for_test(1, &proxy_server.address().to_string());
        let client_for = |version: &str| {
            SslLabsClient::new(
                ProviderEndpoints {
                    api_url: format!("http://provider.test/api/{version}"),
                    content_url: "http://provider.test/".to_string(),
                },
                Pacing::default(),
                "agent",
            )
        };

        let unavailable = client_for("v3").capacity(&proxy).await;
        assert!(matches!(unavailable, Err(ProviderError::Overloaded(_))));

        let captive = client_for("v4").capacity(&proxy).await;
        assert!(matches!(
            captive,
            Err(ProviderError::Transport(TransportError::ProxyProtocol(_)))
        ));
    }
}
