//! Schema migrations, embedded into the binary at build time.

use log::debug;
use sqlx::migrate::Migrator;
use sqlx::SqlitePool;

use crate::error_handling::DatabaseError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Brings the schema up to date. Already applied migrations are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DatabaseError> {
    MIGRATOR.run(pool).await?;
    debug!("Schema at migration {}", MIGRATOR.iter().count());
    Ok(())
}
