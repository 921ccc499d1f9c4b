//! Proxy rows.
//!
//! The claim flag (`currently_in_use`) is only ever set through [`try_claim`],
//! a single-row compare-and-set, so exclusivity holds across processes that
//! share the database.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error_handling::DatabaseError;
use crate::provider::CapacitySnapshot;
use crate::proxy::Proxy;

const PROXY_COLUMNS: &str = "id, address, protocol, is_dead, is_dead_reason, manually_disabled,
    currently_in_use, out_of_capacity, request_speed_ms, capacity_current, capacity_max,
    capacity_this_client, check_result, check_result_at_ms";

fn proxy_from_row(row: &SqliteRow) -> Proxy {
    let capacity = match (
        row.get::<Option<i64>, _>("capacity_max"),
        row.get::<Option<i64>, _>("capacity_current"),
        row.get::<Option<i64>, _>("capacity_this_client"),
    ) {
        (Some(max), Some(current), Some(this_client)) => Some(CapacitySnapshot {
            max,
            current,
            this_client,
        }),
        _ => None,
    };
    Proxy {
        id: row.get("id"),
        address: row.get("address"),
        protocol: row.get("protocol"),
        is_dead: row.get("is_dead"),
        is_dead_reason: row.get("is_dead_reason"),
        manually_disabled: row.get("manually_disabled"),
        currently_in_use: row.get("currently_in_use"),
        out_of_capacity: row.get("out_of_capacity"),
        request_speed_ms: row.get("request_speed_ms"),
        capacity,
        check_result: row.get("check_result"),
        check_result_at_ms: row.get("check_result_at_ms"),
    }
}

/// Inserts a proxy, or returns the id of the existing row with that address.
pub async fn insert_proxy(
    pool: &SqlitePool,
    address: &str,
    protocol: &str,
) -> Result<i64, DatabaseError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO proxy (address, protocol) VALUES (?, ?)
         ON CONFLICT(address) DO UPDATE SET protocol = excluded.protocol
         RETURNING id",
    )
    .bind(address.trim())
    .bind(protocol.trim().to_lowercase())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_proxy(pool: &SqlitePool, id: i64) -> Result<Option<Proxy>, DatabaseError> {
    let row = sqlx::query(&format!("SELECT {PROXY_COLUMNS} FROM proxy WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(proxy_from_row))
}

/// All proxies, fastest first. Proxies never measured sort last.
pub async fn list_proxies(pool: &SqlitePool) -> Result<Vec<Proxy>, DatabaseError> {
    let rows = sqlx::query(&format!(
        "SELECT {PROXY_COLUMNS} FROM proxy
         ORDER BY request_speed_ms IS NULL, request_speed_ms, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(proxy_from_row).collect())
}

/// The fastest proxy that is healthy, unclaimed, enabled and not out of capacity.
///
/// Selection is advisory; the caller must still win [`try_claim`].
pub async fn select_claim_candidate(pool: &SqlitePool) -> Result<Option<Proxy>, DatabaseError> {
    let row = sqlx::query(&format!(
        "SELECT {PROXY_COLUMNS} FROM proxy
         WHERE is_dead = 0 AND manually_disabled = 0
           AND currently_in_use = 0 AND out_of_capacity = 0
         ORDER BY request_speed_ms IS NULL, request_speed_ms, id
         LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(proxy_from_row))
}

/// Compare-and-set on the claim flag. Returns true iff this caller now holds the claim.
pub async fn try_claim(pool: &SqlitePool, id: i64) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        "UPDATE proxy SET currently_in_use = 1, claimed_at_ms = ?
         WHERE id = ? AND currently_in_use = 0 AND is_dead = 0 AND manually_disabled = 0",
    )
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Clears the claim flag unconditionally.
pub async fn release(pool: &SqlitePool, id: i64) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE proxy SET currently_in_use = 0, claimed_at_ms = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Clears every claim flag. Returns how many proxies were still claimed.
pub async fn release_all(pool: &SqlitePool) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        "UPDATE proxy SET currently_in_use = 0, claimed_at_ms = NULL WHERE currently_in_use = 1",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_dead(pool: &SqlitePool, id: i64, reason: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        "UPDATE proxy
         SET is_dead = 1, is_dead_since_ms = ?, is_dead_reason = ?,
             check_result = ?, check_result_at_ms = ?
         WHERE id = ?",
    )
    .bind(now)
    .bind(reason)
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Stores the outcome of a check that reached the provider: the proxy is alive.
///
/// `out_of_capacity` keeps a busy proxy out of claim selection until a later
/// check finds capacity again. Without a `capacity` snapshot the stored
/// counters are left as they were.
pub async fn record_alive(
    pool: &SqlitePool,
    id: i64,
    check_result: &str,
    request_speed_ms: Option<i64>,
    capacity: Option<&CapacitySnapshot>,
    out_of_capacity: bool,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE proxy
         SET is_dead = 0, is_dead_since_ms = NULL, is_dead_reason = NULL,
             out_of_capacity = ?,
             request_speed_ms = COALESCE(?, request_speed_ms),
             capacity_current = COALESCE(?, capacity_current),
             capacity_max = COALESCE(?, capacity_max),
             capacity_this_client = COALESCE(?, capacity_this_client),
             check_result = ?, check_result_at_ms = ?
         WHERE id = ?",
    )
    .bind(out_of_capacity)
    .bind(request_speed_ms)
    .bind(capacity.map(|c| c.current))
    .bind(capacity.map(|c| c.max))
    .bind(capacity.map(|c| c.this_client))
    .bind(check_result)
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Sets the operator kill switch. Returns false when no such proxy exists.
pub async fn set_manually_disabled(
    pool: &SqlitePool,
    id: i64,
    disabled: bool,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query("UPDATE proxy SET manually_disabled = ? WHERE id = ?")
        .bind(disabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
