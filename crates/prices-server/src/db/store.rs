//! Store capability consumed by the ingestion pipeline and the export path

use async_trait::async_trait;
use prices_common::{AggregateSummary, PriceRecord};
use thiserror::Error;

/// Failures reported by a price store
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record collides with an existing business key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// SQL query, connection or pool error
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// The store cannot serve requests (startup, migrations, injected faults)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn duplicate_id(id: i64) -> Self {
        Self::Conflict(format!("product id {} already exists", id))
    }

    /// Map an insert failure, surfacing unique violations as conflicts
    pub fn from_insert(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            },
            other => Self::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional access to the `prices` relation.
///
/// Implementations must make a batch visible to other readers only when
/// [`PriceTransaction::commit`] succeeds.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Open a transaction. Dropping the returned handle without committing
    /// rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn PriceTransaction>>;

    /// Every stored record, in the store's iteration order
    async fn records(&self) -> StoreResult<Vec<PriceRecord>>;

    /// Cheap liveness probe used by the health endpoint
    async fn ping(&self) -> StoreResult<()>;
}

/// One open store transaction
#[async_trait]
pub trait PriceTransaction: Send {
    /// Insert `records` in order. Any failure leaves the transaction unusable
    /// for anything but rollback.
    async fn insert_batch(&mut self, records: &[PriceRecord]) -> StoreResult<()>;

    /// Totals over the whole store as seen from inside this transaction
    async fn summarize(&mut self) -> StoreResult<AggregateSummary>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
