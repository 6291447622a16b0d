//! Orchestrates one upload: parse the archive, persist the batch in a single
//! transaction, report totals.

use prices_common::{AggregateSummary, PriceRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::archive::ArchiveError;
use super::batch::read_batch;
use super::summary;
use crate::config::{IngestConfig, SummaryScope};
use crate::db::{PriceStore, StoreError, StoreResult};

/// How long a failed upload waits for its rollback before dropping the transaction
pub const ROLLBACK_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(#[from] ArchiveError),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] StoreError),

    #[error("Store did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Ingestion was cancelled")]
    Cancelled,

    #[error("Ingestion worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Deadline for everything between `begin` and `commit`
    pub store_timeout: Duration,
    pub summary_scope: SummaryScope,
}

impl From<&IngestConfig> for IngestSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            store_timeout: config.store_timeout(),
            summary_scope: config.summary_scope,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

pub struct IngestCoordinator {
    store: Arc<dyn PriceStore>,
    settings: IngestSettings,
}

impl IngestCoordinator {
    pub fn new(store: Arc<dyn PriceStore>, settings: IngestSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> IngestSettings {
        self.settings
    }

    /// Ingest one zip archive.
    ///
    /// Either every valid row of every tabular entry is committed or nothing
    /// is. Invalid rows are logged and skipped.
    #[instrument(skip_all, fields(archive_bytes = archive.len()))]
    pub async fn ingest(
        &self,
        archive: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<AggregateSummary, IngestError> {
        let parse_cancel = cancel.clone();
        let batch = tokio::task::spawn_blocking(move || read_batch(archive, &parse_cancel))
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;

        if batch.entries == 0 {
            info!("Archive has no tabular entries");
            return Ok(AggregateSummary::zero());
        }
        if batch.is_empty() {
            info!(rejected = batch.rejected, "No valid rows in upload");
            return Ok(AggregateSummary::zero());
        }

        let summary = self.persist(&batch.records, &cancel).await?;

        info!(
            entries = batch.entries,
            inserted = batch.len(),
            rejected = batch.rejected,
            total_items = summary.total_items,
            total_categories = summary.total_categories,
            total_price = %summary.total_price,
            "Upload committed"
        );

        Ok(summary)
    }

    async fn persist(
        &self,
        records: &[PriceRecord],
        cancel: &CancellationToken,
    ) -> Result<AggregateSummary, IngestError> {
        let timeout = self.settings.store_timeout;
        let deadline = Instant::now() + timeout;
        let scope = self.settings.summary_scope;

        let mut tx = bounded(self.store.begin(), deadline, timeout, cancel).await?;

        let staged = bounded(
            async {
                tx.insert_batch(records).await?;
                summary::summarize(scope, tx.as_mut(), records).await
            },
            deadline,
            timeout,
            cancel,
        )
        .await;

        let staged = staged.and_then(|summary| {
            if cancel.is_cancelled() {
                Err(IngestError::Cancelled)
            } else {
                Ok(summary)
            }
        });

        match staged {
            Ok(summary) => {
                // An abandoned commit drops the transaction, which rolls it back
                bounded(tx.commit(), deadline, timeout, cancel).await?;
                Ok(summary)
            },
            Err(err) => {
                warn!(error = %err, rows = records.len(), "Rolling back upload");
                match tokio::time::timeout(ROLLBACK_GRACE, tx.rollback()).await {
                    Ok(Ok(())) => {},
                    Ok(Err(rollback_err)) => {
                        warn!(error = %rollback_err, "Rollback failed, connection will be discarded");
                    },
                    Err(_) => {
                        warn!(grace = ?ROLLBACK_GRACE, "Rollback did not finish, abandoning transaction");
                    },
                }
                Err(err)
            },
        }
    }
}

/// Run a store step unless the request is cancelled or the deadline passes
async fn bounded<T, F>(
    step: F,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, IngestError>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        outcome = tokio::time::timeout_at(deadline, step) => match outcome {
            Ok(result) => result.map_err(IngestError::from),
            Err(_) => Err(IngestError::Timeout(timeout)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryPriceStore;
    use crate::ingest::test_support::build_zip;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn coordinator(store: &MemoryPriceStore, settings: IngestSettings) -> IngestCoordinator {
        IngestCoordinator::new(Arc::new(store.clone()), settings)
    }

    fn decimal(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn record(id: i64) -> PriceRecord {
        PriceRecord::new(
            id,
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            "seed",
            "Seed",
            decimal("5.00"),
        )
    }

    const SCENARIO: &str = "productID,name,category,price,createdAt\n\
                            1,A,Fruit,1.50,2024-01-01\n\
                            2,B,Fruit,2.50,2024-01-02\n\
                            x,C,Veg,3.00,2024-01-03\n";

    #[tokio::test]
    async fn test_skips_invalid_row_and_commits_the_rest() {
        let store = MemoryPriceStore::new();
        let summary = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.total_categories, 1);
        assert_eq!(summary.total_price, decimal("4.00"));

        let ids: Vec<i64> = store.records().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_no_tabular_entries_returns_zeros_without_store_calls() {
        // A failing commit would surface if the store were touched
        let store = MemoryPriceStore::new().with_failing_commit();
        let summary = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("readme.txt", "hi")]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, AggregateSummary::zero());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_only_invalid_rows_returns_zeros() {
        let store = MemoryPriceStore::with_records(vec![record(99)]).with_failing_commit();
        let summary = coordinator(&store, IngestSettings::default())
            .ingest(
                build_zip(&[("prices.csv", "h\nx,A,Fruit,1.00,2024-01-01\n")]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rolls_back_whole_batch() {
        let store = MemoryPriceStore::new();
        let archive = build_zip(&[
            ("a.csv", "h\n1,A,Fruit,1.00,2024-01-01\n2,B,Fruit,1.00,2024-01-01\n"),
            ("b.csv", "h\n3,C,Veg,1.00,2024-01-01\n1,D,Veg,1.00,2024-01-01\n"),
        ]);

        let err = coordinator(&store, IngestSettings::default())
            .ingest(archive, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Transaction(StoreError::Conflict(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_conflict_with_stored_row_leaves_store_unchanged() {
        let store = MemoryPriceStore::with_records(vec![record(2)]);
        let err = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Transaction(StoreError::Conflict(_))));
        assert_eq!(store.records().await.unwrap(), vec![record(2)]);
    }

    #[tokio::test]
    async fn test_store_scope_includes_existing_rows() {
        let store = MemoryPriceStore::with_records(vec![record(10)]);
        let summary = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.total_categories, 2);
        assert_eq!(summary.total_price, decimal("9.00"));
    }

    #[tokio::test]
    async fn test_batch_scope_counts_only_the_upload() {
        let store = MemoryPriceStore::with_records(vec![record(10)]);
        let settings = IngestSettings {
            summary_scope: SummaryScope::Batch,
            ..IngestSettings::default()
        };

        let summary = coordinator(&store, settings)
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.total_categories, 1);
        assert_eq!(summary.total_price, decimal("4.00"));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_rejected() {
        let store = MemoryPriceStore::new();
        let err = coordinator(&store, IngestSettings::default())
            .ingest(b"not a zip at all".to_vec(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::ArchiveCorrupt(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_timeout_rolls_back() {
        let store = MemoryPriceStore::new().with_insert_latency(Duration::from_secs(5));
        let settings = IngestSettings {
            store_timeout: Duration::from_millis(50),
            ..IngestSettings::default()
        };

        let err = coordinator(&store, settings)
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Timeout(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancellation_during_insert_rolls_back() {
        let store = MemoryPriceStore::new().with_insert_latency(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryPriceStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_commit_surfaces() {
        let store = MemoryPriceStore::new().with_failing_commit();
        let err = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Transaction(StoreError::Unavailable(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_rollback_does_not_hold_the_request() {
        let store = MemoryPriceStore::new()
            .with_insert_latency(Duration::from_secs(3600))
            .with_rollback_latency(Duration::from_secs(3600));
        let settings = IngestSettings {
            store_timeout: Duration::from_millis(50),
            ..IngestSettings::default()
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            coordinator(&store, settings)
                .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new()),
        )
        .await
        .expect("ingest must return once the rollback grace runs out");

        assert!(matches!(outcome, Err(IngestError::Timeout(_))));
        assert!(started.elapsed() <= Duration::from_millis(50) + ROLLBACK_GRACE);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_commit_times_out() {
        let store = MemoryPriceStore::new().with_commit_latency(Duration::from_secs(3600));
        let settings = IngestSettings {
            store_timeout: Duration::from_millis(50),
            ..IngestSettings::default()
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            coordinator(&store, settings)
                .ingest(build_zip(&[("prices.csv", SCENARIO)]), CancellationToken::new()),
        )
        .await
        .expect("ingest must return once the store deadline passes");

        assert!(matches!(outcome, Err(IngestError::Timeout(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_commit_rolls_back() {
        let store = MemoryPriceStore::new().with_commit_latency(Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = coordinator(&store, IngestSettings::default())
            .ingest(build_zip(&[("prices.csv", SCENARIO)]), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(store.is_empty().await);
    }

    fn csv_body(ids: &[i64]) -> String {
        let mut body = String::from("productID,name,category,price,createdAt\n");
        for id in ids {
            body.push_str(&format!("{},item,Cat{},1.00,2024-01-01\n", id, id % 3));
        }
        body
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_batch_with_duplicate_persists_nothing(
            ids in prop::collection::hash_set(0i64..10_000, 1..40),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut ids: Vec<i64> = ids.into_iter().collect();
            let duplicate = ids[pick.index(ids.len())];
            ids.push(duplicate);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store = MemoryPriceStore::new();
                let result = coordinator(&store, IngestSettings::default())
                    .ingest(build_zip(&[("prices.csv", csv_body(&ids).as_str())]), CancellationToken::new())
                    .await;

                prop_assert!(matches!(result, Err(IngestError::Transaction(StoreError::Conflict(_)))));
                prop_assert!(store.is_empty().await);
                Ok(())
            })?;
        }

        #[test]
        fn prop_unique_batch_is_fully_counted(
            ids in prop::collection::hash_set(0i64..10_000, 1..40),
        ) {
            let ids: Vec<i64> = ids.into_iter().collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store = MemoryPriceStore::new();
                let summary = coordinator(&store, IngestSettings::default())
                    .ingest(build_zip(&[("prices.csv", csv_body(&ids).as_str())]), CancellationToken::new())
                    .await
                    .unwrap();

                let categories: std::collections::HashSet<i64> = ids.iter().map(|id| id % 3).collect();
                prop_assert_eq!(summary.total_items, ids.len() as i64);
                prop_assert_eq!(summary.total_categories, categories.len() as i64);
                prop_assert_eq!(summary.total_price, BigDecimal::from(ids.len() as i64));
                prop_assert_eq!(store.len().await, ids.len());
                Ok(())
            })?;
        }
    }
}
