//! Target store: organizations, urls and endpoints.
//!
//! Read helpers return plain rows; the Target Selector combines them. Writes
//! are single-row statements, atomic on their own.

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error_handling::DatabaseError;
use crate::models::{EndpointAddress, Target};
use crate::targets::{EndpointFilter, OrganizationFilter};

/// Membership of a url in an organization, with the organization's scope attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRow {
    pub url_id: i64,
    pub country: String,
    pub organization_type: String,
}

/// Inserts an organization, or returns the id of the existing one with that name.
pub async fn add_organization(
    pool: &SqlitePool,
    name: &str,
    country: &str,
    organization_type: &str,
) -> Result<i64, DatabaseError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO organization (name, country, organization_type)
         VALUES (?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
             country = excluded.country,
             organization_type = excluded.organization_type
         RETURNING id",
    )
    .bind(name)
    .bind(country.trim().to_uppercase())
    .bind(organization_type.trim().to_lowercase())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Inserts a url (or reuses the existing row) and links it to the given organizations.
pub async fn add_url(
    pool: &SqlitePool,
    url: &str,
    organization_ids: &[i64],
) -> Result<i64, DatabaseError> {
    let url = url.trim().to_lowercase();
    let url_id: i64 = sqlx::query_scalar(
        "INSERT INTO url (url, created_at_ms) VALUES (?, ?)
         ON CONFLICT(url) DO UPDATE SET url = excluded.url
         RETURNING id",
    )
    .bind(&url)
    .bind(Utc::now().timestamp_millis())
    .fetch_one(pool)
    .await?;

    for organization_id in organization_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO url_organization (url_id, organization_id) VALUES (?, ?)",
        )
        .bind(url_id)
        .bind(organization_id)
        .execute(pool)
        .await?;
    }
    Ok(url_id)
}

/// Inserts an endpoint (or reuses the existing row) on a url.
pub async fn add_endpoint(
    pool: &SqlitePool,
    url_id: i64,
    protocol: &str,
    port: u16,
    ip_version: u8,
) -> Result<i64, DatabaseError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO endpoint (url_id, protocol, port, ip_version, discovered_at_ms)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(url_id, protocol, port, ip_version) DO UPDATE SET protocol = excluded.protocol
         RETURNING id",
    )
    .bind(url_id)
    .bind(protocol.to_lowercase())
    .bind(i64::from(port))
    .bind(i64::from(ip_version))
    .bind(Utc::now().timestamp_millis())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// All url/organization memberships of live organizations.
pub async fn url_scope_rows(pool: &SqlitePool) -> Result<Vec<ScopeRow>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT uo.url_id, o.country, o.organization_type
         FROM url_organization uo
         JOIN organization o ON o.id = uo.organization_id
         WHERE o.is_dead = 0",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ScopeRow {
            url_id: row.get("url_id"),
            country: row.get("country"),
            organization_type: row.get("organization_type"),
        })
        .collect())
}

/// Url ids belonging to organizations matching the filter.
pub async fn url_ids_for_organizations(
    pool: &SqlitePool,
    filter: &OrganizationFilter,
) -> Result<BTreeSet<i64>, DatabaseError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT DISTINCT uo.url_id FROM url_organization uo
         JOIN organization o ON o.id = uo.organization_id
         WHERE o.is_dead = 0",
    );
    if let Some(ids) = &filter.ids {
        push_in_list(&mut qb, " AND o.id", ids.iter().copied());
    }
    if let Some(names) = &filter.names {
        push_in_list(&mut qb, " AND o.name", names.iter().cloned());
    }

    let ids = qb
        .build_query_scalar::<i64>()
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Live urls as url targets. Unresolvable urls are only included on request.
pub async fn load_url_targets(
    pool: &SqlitePool,
    include_unresolvable: bool,
) -> Result<Vec<Target>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT id, url, is_dead, not_resolvable FROM url
         WHERE is_dead = 0 AND (not_resolvable = 0 OR ?)
         ORDER BY url",
    )
    .bind(include_unresolvable)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Target {
            url_id: row.get("id"),
            url: row.get("url"),
            endpoint: None,
            is_dead: row.get("is_dead"),
            resolvable: !row.get::<bool, _>("not_resolvable"),
        })
        .collect())
}

/// Live endpoints on live urls, restricted by the endpoint filter.
pub async fn load_endpoint_targets(
    pool: &SqlitePool,
    filter: &EndpointFilter,
    include_unresolvable: bool,
) -> Result<Vec<Target>, DatabaseError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT e.id AS endpoint_id, e.protocol, e.port, e.ip_version, e.is_dead,
                u.id AS url_id, u.url, u.not_resolvable
         FROM endpoint e
         JOIN url u ON u.id = e.url_id
         WHERE e.is_dead = 0 AND u.is_dead = 0",
    );
    if !include_unresolvable {
        qb.push(" AND u.not_resolvable = 0");
    }
    if let Some(protocols) = &filter.protocols {
        push_in_list(&mut qb, " AND e.protocol", protocols.iter().map(|p| p.to_lowercase()));
    }
    if let Some(ports) = &filter.ports {
        push_in_list(&mut qb, " AND e.port", ports.iter().map(|p| i64::from(*p)));
    }
    if let Some(ip_versions) = &filter.ip_versions {
        push_in_list(&mut qb, " AND e.ip_version", ip_versions.iter().map(|v| i64::from(*v)));
    }
    qb.push(" ORDER BY u.url, e.protocol, e.port, e.ip_version");

    let rows = qb.build().fetch_all(pool).await?;
    rows.into_iter()
        .map(|row| {
            let port: i64 = row.get("port");
            let ip_version: i64 = row.get("ip_version");
            Ok(Target {
                url_id: row.get("url_id"),
                url: row.get("url"),
                endpoint: Some(EndpointAddress {
                    id: row.get("endpoint_id"),
                    protocol: row.get("protocol"),
                    port: u16::try_from(port).map_err(|_| DatabaseError::InvalidValue {
                        column: "endpoint.port",
                        value: port.to_string(),
                    })?,
                    ip_version: u8::try_from(ip_version).map_err(|_| {
                        DatabaseError::InvalidValue {
                            column: "endpoint.ip_version",
                            value: ip_version.to_string(),
                        }
                    })?,
                }),
                is_dead: row.get("is_dead"),
                resolvable: !row.get::<bool, _>("not_resolvable"),
            })
        })
        .collect()
}

/// Records whether a url resolves. Returns true when the flag changed.
pub async fn set_url_resolvable(
    pool: &SqlitePool,
    url_id: i64,
    resolvable: bool,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        "UPDATE url
         SET not_resolvable = ?,
             not_resolvable_since_ms = CASE WHEN ? THEN NULL ELSE ? END
         WHERE id = ? AND not_resolvable = ?",
    )
    .bind(!resolvable)
    .bind(resolvable)
    .bind(Utc::now().timestamp_millis())
    .bind(url_id)
    .bind(resolvable)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Records whether an endpoint is alive. Returns true when the flag changed.
pub async fn set_endpoint_alive(
    pool: &SqlitePool,
    endpoint_id: i64,
    alive: bool,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        "UPDATE endpoint
         SET is_dead = ?,
             is_dead_since_ms = CASE WHEN ? THEN NULL ELSE ? END
         WHERE id = ? AND is_dead = ?",
    )
    .bind(!alive)
    .bind(alive)
    .bind(Utc::now().timestamp_millis())
    .bind(endpoint_id)
    .bind(alive)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Appends `<column> IN (?, ?, ...)`. An empty list matches nothing.
fn push_in_list<'a, T, I>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, values: I)
where
    I: IntoIterator<Item = T>,
    T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    let mut values = values.into_iter().peekable();
    if values.peek().is_none() {
        qb.push(" AND 0");
        return;
    }
    qb.push(column);
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetRef;
    use crate::storage::test_helpers::{create_test_pool, seed_https_target};

    #[tokio::test]
    async fn test_add_url_is_idempotent_and_links_organizations() {
        let pool = create_test_pool().await;
        let org_a = add_organization(&pool, "Org A", "nl", "Municipality").await.unwrap();
        let org_b = add_organization(&pool, "Org B", "NL", "province").await.unwrap();

        let first = add_url(&pool, "Example.NL", &[org_a]).await.unwrap();
        let second = add_url(&pool, "example.nl", &[org_a, org_b]).await.unwrap();
        assert_eq!(first, second);

        let rows = url_scope_rows(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&ScopeRow {
            url_id: first,
            country: "NL".to_string(),
            organization_type: "municipality".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_endpoint_filter_and_liveness() {
        let pool = create_test_pool().await;
        let (_, url_id, https_id) =
            seed_https_target(&pool, "Org", "NL", "municipality", "example.nl").await;
        let ftp_id = add_endpoint(&pool, url_id, "ftp", 21, 4).await.unwrap();

        let only_ftp = EndpointFilter {
            protocols: Some(vec!["FTP".to_string()]),
            ..Default::default()
        };
        let targets = load_endpoint_targets(&pool, &only_ftp, false).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].reference(), TargetRef::endpoint(ftp_id));

        assert!(set_endpoint_alive(&pool, ftp_id, false).await.unwrap());
        assert!(!set_endpoint_alive(&pool, ftp_id, false).await.unwrap());
        let targets = load_endpoint_targets(&pool, &only_ftp, false).await.unwrap();
        assert!(targets.is_empty());

        let all = load_endpoint_targets(&pool, &EndpointFilter::default(), false)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].reference(), TargetRef::endpoint(https_id));
    }

    #[tokio::test]
    async fn test_empty_in_list_matches_nothing() {
        let pool = create_test_pool().await;
        seed_https_target(&pool, "Org", "NL", "municipality", "example.nl").await;
        let filter = EndpointFilter {
            ports: Some(vec![]),
            ..Default::default()
        };
        let targets = load_endpoint_targets(&pool, &filter, false).await.unwrap();
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_urls_are_skipped_unless_requested() {
        let pool = create_test_pool().await;
        let (_, url_id, _) =
            seed_https_target(&pool, "Org", "NL", "municipality", "example.nl").await;
        assert!(set_url_resolvable(&pool, url_id, false).await.unwrap());

        assert!(load_url_targets(&pool, false).await.unwrap().is_empty());
        let with_unresolvable = load_url_targets(&pool, true).await.unwrap();
        assert_eq!(with_unresolvable.len(), 1);
        assert!(!with_unresolvable[0].resolvable);

        assert!(load_endpoint_targets(&pool, &EndpointFilter::default(), false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_organization_filter_by_name() {
        let pool = create_test_pool().await;
        let (_, url_a, _) = seed_https_target(&pool, "Org A", "NL", "municipality", "a.nl").await;
        seed_https_target(&pool, "Org B", "NL", "municipality", "b.nl").await;

        let filter = OrganizationFilter {
            names: Some(vec!["Org A".to_string()]),
            ..Default::default()
        };
        let ids = url_ids_for_organizations(&pool, &filter).await.unwrap();
        assert_eq!(ids, BTreeSet::from([url_a]));
    }
}
