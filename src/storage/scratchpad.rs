//! Debug scratchpad: raw provider responses, one row per poll.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::config::MAX_SCRATCHPAD_LENGTH;
use crate::error_handling::DatabaseError;
use crate::models::ScanFamily;

/// Records a raw response. Oversized payloads are truncated on a char boundary.
pub async fn record(
    pool: &SqlitePool,
    family: ScanFamily,
    target: &str,
    http_status: Option<u16>,
    data: &str,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO scratchpad (scan_family, target, http_status, data, at_when_ms)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(family.as_str())
    .bind(target)
    .bind(http_status.map(i64::from))
    .bind(truncate(data, MAX_SCRATCHPAD_LENGTH))
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes entries older than `cutoff_ms`. Returns the number of rows removed.
pub async fn prune_older_than(pool: &SqlitePool, cutoff_ms: i64) -> Result<u64, DatabaseError> {
    let result = sqlx::query("DELETE FROM scratchpad WHERE at_when_ms < ?")
        .bind(cutoff_ms)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Number of entries recorded for a target.
pub async fn count_for_target(pool: &SqlitePool, target: &str) -> Result<i64, DatabaseError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scratchpad WHERE target = ?")
        .bind(target)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn truncate(data: &str, max: usize) -> &str {
    if data.len() <= max {
        return data;
    }
    let mut end = max;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}
