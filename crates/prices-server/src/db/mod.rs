//! Persistence for price records
//!
//! The ingestion pipeline talks to storage only through the [`PriceStore`]
//! capability. Two implementations exist:
//!
//! - [`PgPriceStore`]: PostgreSQL via sqlx, one table `prices`
//! - [`MemoryPriceStore`]: in-process, for local runs and tests

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryPriceStore;
pub use postgres::PgPriceStore;
pub use store::{PriceStore, PriceTransaction, StoreError, StoreResult};

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open the connection pool described by `config`
pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed");
    Ok(())
}
