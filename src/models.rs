//! Core domain types shared by the orchestration components.
//!
//! - `ScanFamily`: the tagged registry of scanners (one variant per family)
//! - `ScanType`: the persisted result types a family produces
//! - `Severity`: the common total order every analyzer collapses into
//! - `Target` / `TargetRef`: scan units and their stable references

use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// How a scan family obtains its raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    /// Registered with a remote, rate-limited provider through a claimed proxy and polled.
    Provider,
    /// Probed directly from the worker.
    Local,
}

/// Scanner families. Each variant owns a fixed compose/analyze capability pair.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScanFamily {
    TlsQualys,
    Ftp,
    HttpHeaders,
    Dns,
    Mail,
}

impl ScanFamily {
    /// All families in registry order.
    pub fn all() -> Vec<ScanFamily> {
        ScanFamily::iter().collect()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn kind(&self) -> FamilyKind {
        match self {
            ScanFamily::TlsQualys => FamilyKind::Provider,
            _ => FamilyKind::Local,
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        match self {
            ScanFamily::TlsQualys | ScanFamily::Ftp | ScanFamily::HttpHeaders => {
                TargetKind::Endpoint
            }
            ScanFamily::Dns | ScanFamily::Mail => TargetKind::Url,
        }
    }

    /// Verification families also look at urls that currently do not resolve,
    /// so that they can notice when a domain comes back.
    pub fn includes_unresolvable(&self) -> bool {
        matches!(self, ScanFamily::Dns)
    }

    /// The result types this family writes to the result store.
    pub fn scan_types(&self) -> &'static [ScanType] {
        match self {
            ScanFamily::TlsQualys => &[
                ScanType::TlsQualysCertificateTrusted,
                ScanType::TlsQualysEncryptionQuality,
            ],
            ScanFamily::Ftp => &[ScanType::Ftp],
            ScanFamily::HttpHeaders => &[
                ScanType::HttpSecurityHeaderStrictTransportSecurity,
                ScanType::HttpSecurityHeaderXContentTypeOptions,
                ScanType::HttpSecurityHeaderXFrameOptions,
            ],
            ScanFamily::Dns => &[ScanType::DnsResolvable],
            ScanFamily::Mail => &[ScanType::MailSpf, ScanType::MailDmarc],
        }
    }
}

/// Persisted result types. Stored by their snake_case name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScanType {
    TlsQualysCertificateTrusted,
    TlsQualysEncryptionQuality,
    Ftp,
    HttpSecurityHeaderStrictTransportSecurity,
    HttpSecurityHeaderXContentTypeOptions,
    HttpSecurityHeaderXFrameOptions,
    DnsResolvable,
    MailSpf,
    MailDmarc,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn family(&self) -> ScanFamily {
        match self {
            ScanType::TlsQualysCertificateTrusted | ScanType::TlsQualysEncryptionQuality => {
                ScanFamily::TlsQualys
            }
            ScanType::Ftp => ScanFamily::Ftp,
            ScanType::HttpSecurityHeaderStrictTransportSecurity
            | ScanType::HttpSecurityHeaderXContentTypeOptions
            | ScanType::HttpSecurityHeaderXFrameOptions => ScanFamily::HttpHeaders,
            ScanType::DnsResolvable => ScanFamily::Dns,
            ScanType::MailSpf | ScanType::MailDmarc => ScanFamily::Mail,
        }
    }
}

/// Common severity scale.
///
/// Every analyzer maps its scanner-specific rating onto this total order.
/// `NoInformation` is the floor: nothing could be concluded about the target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    NoInformation,
    Ok,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The least trusting severity, used when output cannot be interpreted.
    pub fn most_conservative() -> Severity {
        Severity::High
    }
}

/// Output of a result analyzer for one scan type: what gets handed to the
/// result store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub scan_type: ScanType,
    /// Machine-readable rating token, compared verbatim for deduplication.
    pub rating: String,
    pub severity: Severity,
    pub message: String,
    pub evidence: String,
}

impl Analysis {
    pub fn new(
        scan_type: ScanType,
        rating: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scan_type,
            rating: rating.into(),
            severity,
            message: message.into(),
            evidence: String::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }
}

/// Whether a target is a bare url or a concrete endpoint on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TargetKind {
    Url,
    Endpoint,
}

/// Stable reference to a target row in the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: i64,
}

impl TargetRef {
    pub fn url(id: i64) -> Self {
        Self {
            kind: TargetKind::Url,
            id,
        }
    }

    pub fn endpoint(id: i64) -> Self {
        Self {
            kind: TargetKind::Endpoint,
            id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Protocol/port/ip-version of an endpoint target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAddress {
    pub id: i64,
    pub protocol: String,
    pub port: u16,
    pub ip_version: u8,
}

/// A scan unit: a url, or an endpoint on a url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url_id: i64,
    pub url: String,
    pub endpoint: Option<EndpointAddress>,
    pub is_dead: bool,
    pub resolvable: bool,
}

impl Target {
    pub fn reference(&self) -> TargetRef {
        match &self.endpoint {
            Some(endpoint) => TargetRef::endpoint(endpoint.id),
            None => TargetRef::url(self.url_id),
        }
    }

    /// Host name used when contacting the target or the provider.
    pub fn host(&self) -> &str {
        &self.url
    }

    /// Human readable address: `domain` or `domain:port:protocol`.
    pub fn address(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}:{}:{}", self.url, endpoint.port, endpoint.protocol),
            None => self.url.clone(),
        }
    }

    /// Ordering key used to keep selections deterministic.
    pub(crate) fn sort_key(&self) -> (String, String, u16, u8, i64) {
        match &self.endpoint {
            Some(e) => (self.url.clone(), e.protocol.clone(), e.port, e.ip_version, e.id),
            None => (self.url.clone(), String::new(), 0, 0, self.url_id),
        }
    }
}
