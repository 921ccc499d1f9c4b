//! Capability oracle: which scan families may run, and against what.
//!
//! The oracle is injected into components at construction. `StaticCapabilities`
//! answers from a configuration snapshot; other implementations can read
//! runtime-editable settings.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::models::ScanFamily;

/// One allowed (country, organization type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeEntry {
    pub country: String,
    pub organization_type: String,
}

impl ScopeEntry {
    pub fn new(country: &str, organization_type: &str) -> Self {
        Self {
            country: country.trim().to_uppercase(),
            organization_type: organization_type.trim().to_lowercase(),
        }
    }
}

impl FromStr for ScopeEntry {
    type Err = String;

    /// Parses `COUNTRY:ORGANIZATION_TYPE`, e.g. `NL:municipality`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((country, organization_type))
                if !country.trim().is_empty() && !organization_type.trim().is_empty() =>
            {
                Ok(ScopeEntry::new(country, organization_type))
            }
            _ => Err(format!(
                "invalid scope entry '{s}', expected COUNTRY:ORGANIZATION_TYPE"
            )),
        }
    }
}

impl fmt::Display for ScopeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.country, self.organization_type)
    }
}

/// The set of (country, organization type) pairs a scan may touch.
///
/// An empty scope allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanScope {
    entries: BTreeSet<ScopeEntry>,
}

impl ScanScope {
    pub fn new<I: IntoIterator<Item = ScopeEntry>>(entries: I) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scope predicate. Country is compared case-insensitively as stored upper case.
    pub fn allows(&self, country: &str, organization_type: &str) -> bool {
        self.entries
            .contains(&ScopeEntry::new(country, organization_type))
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScopeEntry> {
        self.entries.iter()
    }
}

/// Which activity a scope is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLevel {
    /// Finding new targets
    Discovery,
    /// Checking liveness/resolvability of known targets
    Verification,
    /// Running scans that produce results
    Scan,
}

/// Boolean capability oracle consulted by the orchestration core.
pub trait CapabilityOracle: Send + Sync {
    fn is_scan_type_enabled(&self, family: ScanFamily) -> bool;

    fn scan_scope(&self, level: ScopeLevel) -> ScanScope;
}

/// Oracle answering from a fixed configuration snapshot.
///
/// The same scope is used for every level.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    enabled: BTreeSet<ScanFamily>,
    scope: ScanScope,
}

impl StaticCapabilities {
    pub fn new<F, S>(enabled: F, scope: S) -> Self
    where
        F: IntoIterator<Item = ScanFamily>,
        S: IntoIterator<Item = ScopeEntry>,
    {
        Self {
            enabled: enabled.into_iter().collect(),
            scope: ScanScope::new(scope),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.enabled_families.iter().copied(),
            config.scope.iter().cloned(),
        )
    }
}

impl CapabilityOracle for StaticCapabilities {
    fn is_scan_type_enabled(&self, family: ScanFamily) -> bool {
        self.enabled.contains(&family)
    }

    fn scan_scope(&self, _level: ScopeLevel) -> ScanScope {
        self.scope.clone()
    }
}
