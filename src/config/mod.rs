//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (batch size, pacing, backoff, timeouts)
//! - The library `Config` snapshot and its `Pacing` durations
//! - CLI option types and parsing

mod constants;
mod types;

pub use constants::*;
pub use types::{Config, LogFormat, LogLevel, Opt, Pacing, ProviderEndpoints};
