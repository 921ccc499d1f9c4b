//! Application initialization and resource setup.
//!
//! This module provides functions to initialize all shared resources:
//! - Logger
//! - HTTP clients (per-proxy provider clients and the direct probe client)
//! - DNS resolver
//! - Batch-claim rate limiter and the worker-pool semaphore

mod client;
mod logger;
mod rate_limiter;
mod resolver;

use std::sync::Arc;

use tokio::sync::Semaphore;

pub use client::{init_probe_client, init_proxy_client};
pub use logger::init_logger_with;
pub use rate_limiter::{init_claim_rate_limiter, init_rate_limiter, RateLimiter};
pub use resolver::init_resolver;

/// Initializes a semaphore bounding the worker pool.
///
/// # Arguments
///
/// * `count` - Maximum number of work units processed at the same time
pub fn init_semaphore(count: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(count.max(1)))
}
