//! HTTP client initialization.
//!
//! Two kinds of clients are built here:
//! - per-proxy provider clients, routing every call through one egress proxy
//! - the direct probe client used by the HTTP header scanner

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::Pacing;
use crate::proxy::Proxy;

/// Builds a client that sends every request through `proxy`.
///
/// The connect timeout is the network timeout; the overall request timeout
/// adds the remote processing timeout on top, so a slow provider answer is
/// not mistaken for an unreachable proxy.
///
/// # Errors
///
/// Returns a `reqwest::Error` if the proxy address is invalid or the client
/// cannot be built.
pub fn init_proxy_client(
    proxy: &Proxy,
    pacing: &Pacing,
    user_agent: &str,
) -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .proxy(reqwest::Proxy::all(proxy.url())?)
        .connect_timeout(pacing.network_timeout)
        .timeout(pacing.network_timeout + pacing.remote_processing_timeout)
        .user_agent(user_agent.to_string())
        .build()
}

/// Builds the client for direct HTTP probes.
///
/// Redirects are not followed: headers are judged on the endpoint that was
/// asked for. Certificate problems are reported by the TLS family, so they are
/// not allowed to hide the headers here.
pub fn init_probe_client(timeout_secs: u64, user_agent: &str) -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent.to_string())
        .build()
}
