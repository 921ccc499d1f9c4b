//! Target Selector.
//!
//! Turns organization/url/endpoint filters plus the configured scan scope into
//! a deduplicated, ordered list of targets. Every filter dimension narrows an
//! id set; the sets are intersected, never concatenated, so a url reachable
//! through several organizations or endpoint rows still yields each target once.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use sqlx::SqlitePool;

use crate::capabilities::ScanScope;
use crate::error_handling::DatabaseError;
use crate::models::{ScanFamily, Target, TargetKind, TargetRef};
use crate::storage::targets::{
    load_endpoint_targets, load_url_targets, url_ids_for_organizations, url_scope_rows,
};

/// Organization dimension. `None` fields do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationFilter {
    pub ids: Option<Vec<i64>>,
    pub names: Option<Vec<String>>,
}

impl OrganizationFilter {
    pub fn is_active(&self) -> bool {
        self.ids.is_some() || self.names.is_some()
    }
}

/// Url dimension. `None` fields do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlFilter {
    pub ids: Option<Vec<i64>>,
    pub urls: Option<Vec<String>>,
}

impl UrlFilter {
    pub fn matches(&self, target: &Target) -> bool {
        let id_ok = self
            .ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&target.url_id));
        let url_ok = self
            .urls
            .as_ref()
            .map_or(true, |urls| urls.iter().any(|u| u.eq_ignore_ascii_case(&target.url)));
        id_ok && url_ok
    }
}

/// Endpoint dimension. `None` fields do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointFilter {
    pub protocols: Option<Vec<String>>,
    pub ports: Option<Vec<u16>>,
    pub ip_versions: Option<Vec<u8>>,
}

impl EndpointFilter {
    /// Intersection of two filters: a value must pass both.
    pub fn narrowed_by(&self, other: &EndpointFilter) -> EndpointFilter {
        EndpointFilter {
            protocols: intersect(
                lowercase(&self.protocols).as_ref(),
                lowercase(&other.protocols).as_ref(),
            ),
            ports: intersect(self.ports.as_ref(), other.ports.as_ref()),
            ip_versions: intersect(self.ip_versions.as_ref(), other.ip_versions.as_ref()),
        }
    }
}

fn lowercase(values: &Option<Vec<String>>) -> Option<Vec<String>> {
    values
        .as_ref()
        .map(|v| v.iter().map(|s| s.to_lowercase()).collect())
}

fn intersect<T: Clone + PartialEq>(a: Option<&Vec<T>>, b: Option<&Vec<T>>) -> Option<Vec<T>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.iter().filter(|v| b.contains(v)).cloned().collect()),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// All filter dimensions of a scan request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFilters {
    pub organizations: OrganizationFilter,
    pub urls: UrlFilter,
    pub endpoints: EndpointFilter,
}

impl ScanFamily {
    /// Endpoints a family can scan at all, before operator filters apply.
    pub fn default_endpoint_filter(&self) -> EndpointFilter {
        match self {
            ScanFamily::TlsQualys => EndpointFilter {
                protocols: Some(vec!["https".to_string()]),
                ports: Some(vec![443]),
                ..Default::default()
            },
            ScanFamily::Ftp => EndpointFilter {
                protocols: Some(vec!["ftp".to_string()]),
                ports: Some(vec![21]),
                ..Default::default()
            },
            ScanFamily::HttpHeaders => EndpointFilter {
                protocols: Some(vec!["http".to_string(), "https".to_string()]),
                ..Default::default()
            },
            ScanFamily::Dns | ScanFamily::Mail => EndpointFilter::default(),
        }
    }
}

/// Selects the targets `family` should scan.
///
/// An empty scope yields no targets, whatever the other filters say.
pub async fn select_targets(
    pool: &SqlitePool,
    family: ScanFamily,
    filters: &TargetFilters,
    scope: &ScanScope,
) -> Result<Vec<Target>, DatabaseError> {
    if scope.is_empty() {
        debug!("{family}: empty scan scope, selecting nothing");
        return Ok(Vec::new());
    }

    let mut allowed_urls: BTreeSet<i64> = url_scope_rows(pool)
        .await?
        .into_iter()
        .filter(|row| scope.allows(&row.country, &row.organization_type))
        .map(|row| row.url_id)
        .collect();

    if filters.organizations.is_active() {
        let by_organization = url_ids_for_organizations(pool, &filters.organizations).await?;
        allowed_urls = allowed_urls.intersection(&by_organization).copied().collect();
    }
    if allowed_urls.is_empty() {
        return Ok(Vec::new());
    }

    let include_unresolvable = family.includes_unresolvable();
    let candidates = match family.target_kind() {
        TargetKind::Url => load_url_targets(pool, include_unresolvable).await?,
        TargetKind::Endpoint => {
            let endpoint_filter = family
                .default_endpoint_filter()
                .narrowed_by(&filters.endpoints);
            load_endpoint_targets(pool, &endpoint_filter, include_unresolvable).await?
        }
    };

    let mut unique: BTreeMap<TargetRef, Target> = BTreeMap::new();
    for target in candidates {
        if allowed_urls.contains(&target.url_id) && filters.urls.matches(&target) {
            unique.entry(target.reference()).or_insert(target);
        }
    }

    let mut targets: Vec<Target> = unique.into_values().collect();
    targets.sort_by_key(|t| t.sort_key());
    debug!("{family}: selected {} targets", targets.len());
    Ok(targets)
}
