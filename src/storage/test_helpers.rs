//! Shared test helpers for storage and orchestration tests.
//!
//! Provides an in-memory database with migrations applied and small seeding
//! helpers for organizations, urls, endpoints and proxies.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::storage::run_migrations;
use crate::storage::targets::{add_endpoint, add_organization, add_url};

/// Creates a test database pool with migrations applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Seeds one organization owning `url`, with an https/443 endpoint.
/// Returns `(organization_id, url_id, endpoint_id)`.
pub async fn seed_https_target(
    pool: &SqlitePool,
    organization: &str,
    country: &str,
    organization_type: &str,
    url: &str,
) -> (i64, i64, i64) {
    let organization_id = add_organization(pool, organization, country, organization_type)
        .await
        .expect("Failed to insert organization");
    let url_id = add_url(pool, url, &[organization_id])
        .await
        .expect("Failed to insert url");
    let endpoint_id = add_endpoint(pool, url_id, "https", 443, 4)
        .await
        .expect("Failed to insert endpoint");
    (organization_id, url_id, endpoint_id)
}

/// Inserts a proxy row and returns its id.
pub async fn seed_proxy(pool: &SqlitePool, address: &str, request_speed_ms: Option<i64>) -> i64 {
    let id = crate::storage::proxies::insert_proxy(pool, address, "http")
        .await
        .expect("Failed to insert proxy");
    if let Some(speed) = request_speed_ms {
        sqlx::query("UPDATE proxy SET request_speed_ms = ? WHERE id = ?")
            .bind(speed)
            .bind(id)
            .execute(pool)
            .await
            .expect("Failed to set proxy speed");
    }
    id
}
