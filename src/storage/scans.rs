//! Deduplicating result store.
//!
//! A (scan_type, target) pair keeps a history of rows, one per observed
//! change of (rating, message). Repeating an unchanged observation only moves
//! `last_scan_moment_ms` forward. Exactly one row per pair carries
//! `is_the_latest_scan = 1`; a partial unique index backs that up.

use std::str::FromStr;

use chrono::Utc;
use log::debug;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error_handling::DatabaseError;
use crate::models::{Analysis, ScanType, Severity, TargetKind, TargetRef};

/// What `add_scan` did with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddScanOutcome {
    /// A new row was inserted and marked latest.
    Created,
    /// The latest row already said the same thing; only its timestamp moved.
    Refreshed,
}

/// A persisted scan result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub id: i64,
    pub scan_type: ScanType,
    pub target: TargetRef,
    pub rating: String,
    pub severity: Severity,
    pub explanation: String,
    pub evidence: String,
    pub last_scan_moment_ms: i64,
    pub rating_determined_on_ms: i64,
    pub is_the_latest_scan: bool,
}

fn parse_column<T: FromStr>(column: &'static str, value: String) -> Result<T, DatabaseError> {
    T::from_str(&value).map_err(|_| DatabaseError::InvalidValue { column, value })
}

fn record_from_row(row: &SqliteRow) -> Result<ScanRecord, DatabaseError> {
    Ok(ScanRecord {
        id: row.get("id"),
        scan_type: parse_column("generic_scan.scan_type", row.get("scan_type"))?,
        target: TargetRef {
            kind: parse_column::<TargetKind>("generic_scan.target_kind", row.get("target_kind"))?,
            id: row.get("target_id"),
        },
        rating: row.get("rating"),
        severity: parse_column("generic_scan.severity", row.get("severity"))?,
        explanation: row.get("explanation"),
        evidence: row.get("evidence"),
        last_scan_moment_ms: row.get("last_scan_moment_ms"),
        rating_determined_on_ms: row.get("rating_determined_on_ms"),
        is_the_latest_scan: row.get("is_the_latest_scan"),
    })
}

/// Stores an observation at the current time.
pub async fn add_scan(
    pool: &SqlitePool,
    target: TargetRef,
    analysis: &Analysis,
) -> Result<AddScanOutcome, DatabaseError> {
    add_scan_at(pool, target, analysis, Utc::now().timestamp_millis()).await
}

/// Stores an observation made at `moment_ms`.
///
/// The lookup and the conditional write happen inside one `BEGIN IMMEDIATE`
/// transaction, so two workers reporting on the same pair cannot both insert.
/// The transaction rolls back when it is dropped uncommitted, also when the
/// calling task is cancelled halfway.
pub async fn add_scan_at(
    pool: &SqlitePool,
    target: TargetRef,
    analysis: &Analysis,
    moment_ms: i64,
) -> Result<AddScanOutcome, DatabaseError> {
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let outcome = store_in_transaction(&mut tx, target, analysis, moment_ms).await?;
    tx.commit().await?;
    debug!(
        "{} for {}: {:?} ({})",
        analysis.scan_type, target, outcome, analysis.rating
    );
    Ok(outcome)
}

async fn store_in_transaction(
    conn: &mut SqliteConnection,
    target: TargetRef,
    analysis: &Analysis,
    moment_ms: i64,
) -> Result<AddScanOutcome, DatabaseError> {
    let target_kind = target.kind.to_string();
    let latest = sqlx::query(
        "SELECT id, rating, explanation FROM generic_scan
         WHERE scan_type = ? AND target_kind = ? AND target_id = ? AND is_the_latest_scan = 1",
    )
    .bind(analysis.scan_type.as_str())
    .bind(&target_kind)
    .bind(target.id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = latest {
        let rating: String = row.get("rating");
        let explanation: String = row.get("explanation");
        if rating == analysis.rating && explanation == analysis.message {
            sqlx::query(
                "UPDATE generic_scan
                 SET last_scan_moment_ms = MAX(last_scan_moment_ms, ?)
                 WHERE id = ?",
            )
            .bind(moment_ms)
            .bind(row.get::<i64, _>("id"))
            .execute(&mut *conn)
            .await?;
            return Ok(AddScanOutcome::Refreshed);
        }

        sqlx::query("UPDATE generic_scan SET is_the_latest_scan = 0 WHERE id = ?")
            .bind(row.get::<i64, _>("id"))
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        "INSERT INTO generic_scan (
            scan_type, target_kind, target_id, rating, severity, explanation, evidence,
            last_scan_moment_ms, rating_determined_on_ms, is_the_latest_scan
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(analysis.scan_type.as_str())
    .bind(&target_kind)
    .bind(target.id)
    .bind(&analysis.rating)
    .bind(analysis.severity.as_str())
    .bind(&analysis.message)
    .bind(&analysis.evidence)
    .bind(moment_ms)
    .bind(moment_ms)
    .execute(&mut *conn)
    .await?;

    Ok(AddScanOutcome::Created)
}

/// The row currently marked latest for (scan_type, target).
pub async fn latest_scan(
    pool: &SqlitePool,
    scan_type: ScanType,
    target: TargetRef,
) -> Result<Option<ScanRecord>, DatabaseError> {
    let row = sqlx::query(
        "SELECT * FROM generic_scan
         WHERE scan_type = ? AND target_kind = ? AND target_id = ? AND is_the_latest_scan = 1",
    )
    .bind(scan_type.as_str())
    .bind(target.kind.to_string())
    .bind(target.id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Full history for (scan_type, target), oldest first.
pub async fn scan_history(
    pool: &SqlitePool,
    scan_type: ScanType,
    target: TargetRef,
) -> Result<Vec<ScanRecord>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT * FROM generic_scan
         WHERE scan_type = ? AND target_kind = ? AND target_id = ?
         ORDER BY rating_determined_on_ms, id",
    )
    .bind(scan_type.as_str())
    .bind(target.kind.to_string())
    .bind(target.id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

/// True iff the latest record carries a finding: a non-empty, non-zero rating
/// with a severity above `Ok`.
///
/// Used to decide whether a "resolved" observation is worth recording.
pub async fn had_scan_with_points(
    pool: &SqlitePool,
    scan_type: ScanType,
    target: TargetRef,
) -> Result<bool, DatabaseError> {
    Ok(latest_scan(pool, scan_type, target)
        .await?
        .is_some_and(|record| {
            let rating = record.rating.trim();
            !rating.is_empty() && rating != "0" && record.severity > Severity::Ok
        }))
}

/// Most recent moment a (scan_type, target) pair was scanned, in epoch millis.
pub async fn last_scan_moment(
    pool: &SqlitePool,
    scan_type: ScanType,
    target: TargetRef,
) -> Result<Option<i64>, DatabaseError> {
    let moment: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(last_scan_moment_ms) FROM generic_scan
         WHERE scan_type = ? AND target_kind = ? AND target_id = ?",
    )
    .bind(scan_type.as_str())
    .bind(target.kind.to_string())
    .bind(target.id)
    .fetch_one(pool)
    .await?;
    Ok(moment)
}
