//! PostgreSQL-backed price store
//
// Inserts are batched into multi-row VALUES statements. Each row binds 5
// parameters, so 1000 rows stay well under PostgreSQL's 65,535 limit.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use prices_common::{AggregateSummary, PriceRecord};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::store::{PriceStore, PriceTransaction, StoreError, StoreResult};

/// Rows per INSERT statement
const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct PriceRow {
    id: i64,
    created_at: NaiveDate,
    name: String,
    category: String,
    price: BigDecimal,
}

impl From<PriceRow> for PriceRecord {
    fn from(row: PriceRow) -> Self {
        PriceRecord::new(row.id, row.created_at, row.name, row.category, row.price)
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    async fn begin(&self) -> StoreResult<Box<dyn PriceTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPriceTransaction { tx }))
    }

    async fn records(&self) -> StoreResult<Vec<PriceRecord>> {
        let rows = sqlx::query_as::<_, PriceRow>(
            "SELECT id, created_at, name, category, price FROM prices ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PriceRecord::from).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgPriceTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PriceTransaction for PgPriceTransaction {
    async fn insert_batch(&mut self, records: &[PriceRecord]) -> StoreResult<()> {
        let total_chunks = records.len().div_ceil(INSERT_CHUNK_SIZE);

        for (chunk_idx, chunk) in records.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO prices (id, created_at, name, category, price) ");

            query_builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id)
                    .push_bind(record.created_at)
                    .push_bind(record.name.as_str())
                    .push_bind(record.category.as_str())
                    .push_bind(record.price.clone());
            });

            query_builder
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(StoreError::from_insert)?;

            debug!(
                chunk = chunk_idx + 1,
                total_chunks,
                rows = chunk.len(),
                "Inserted price chunk"
            );
        }

        Ok(())
    }

    async fn summarize(&mut self) -> StoreResult<AggregateSummary> {
        let (total_items, total_categories, total_price): (i64, i64, BigDecimal) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), COUNT(DISTINCT category), COALESCE(SUM(price), 0)
                FROM prices
                "#,
            )
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(AggregateSummary {
            total_items,
            total_categories,
            total_price,
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
