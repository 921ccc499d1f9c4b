//! DNS resolver initialization.
//!
//! The resolver backs the DNS resolvability and mail (SPF/DMARC) probes.

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error_handling::InitializationError;

/// Initializes the DNS resolver used by local probes.
///
/// Uses the default upstream configuration with short timeouts so that a
/// slow nameserver only costs a few seconds per target. Answers are not
/// cached between lookups of different targets beyond hickory's own cache.
pub fn init_resolver() -> Result<Arc<TokioAsyncResolver>, InitializationError> {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(crate::config::DNS_TIMEOUT_SECS);
    opts.attempts = 2;
    // Targets are fully qualified; never append search domains
    opts.ndots = 0;

    Ok(Arc::new(TokioAsyncResolver::tokio(
        ResolverConfig::default(),
        opts,
    )))
}
