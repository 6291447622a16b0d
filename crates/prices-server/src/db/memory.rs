//! In-process price store
//!
//! Keeps committed records in insertion order behind an async lock. A
//! transaction stages its rows privately and publishes them in one step on
//! commit, re-checking the primary key against rows committed meanwhile, so
//! concurrent uploads of the same id behave like a unique-constraint
//! conflict in PostgreSQL.

use async_trait::async_trait;
use prices_common::{AggregateSummary, PriceRecord};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::store::{PriceStore, PriceTransaction, StoreError, StoreResult};

#[derive(Clone, Default)]
pub struct MemoryPriceStore {
    rows: Arc<RwLock<Vec<PriceRecord>>>,
    faults: Faults,
}

/// Failure and latency knobs for exercising the pipeline's error paths
#[derive(Clone, Copy, Default)]
struct Faults {
    insert_latency: Option<Duration>,
    commit_latency: Option<Duration>,
    rollback_latency: Option<Duration>,
    fail_commit: bool,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`
    pub fn with_records(records: Vec<PriceRecord>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(records)),
            faults: Faults::default(),
        }
    }

    /// Every `insert_batch` sleeps for `latency` before touching the rows
    pub fn with_insert_latency(mut self, latency: Duration) -> Self {
        self.faults.insert_latency = Some(latency);
        self
    }

    /// Every commit sleeps for `latency` before publishing the rows
    pub fn with_commit_latency(mut self, latency: Duration) -> Self {
        self.faults.commit_latency = Some(latency);
        self
    }

    /// Every rollback sleeps for `latency`, like a store that stopped answering
    pub fn with_rollback_latency(mut self, latency: Duration) -> Self {
        self.faults.rollback_latency = Some(latency);
        self
    }

    /// Every commit fails after the batch was staged
    pub fn with_failing_commit(mut self) -> Self {
        self.faults.fail_commit = true;
        self
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn begin(&self) -> StoreResult<Box<dyn PriceTransaction>> {
        Ok(Box::new(MemoryTransaction {
            rows: Arc::clone(&self.rows),
            faults: self.faults,
            staged: Vec::new(),
            staged_ids: HashSet::new(),
            poisoned: false,
        }))
    }

    async fn records(&self) -> StoreResult<Vec<PriceRecord>> {
        Ok(self.rows.read().await.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryTransaction {
    rows: Arc<RwLock<Vec<PriceRecord>>>,
    faults: Faults,
    staged: Vec<PriceRecord>,
    staged_ids: HashSet<i64>,
    /// Set after a failed statement, like an aborted PostgreSQL transaction
    poisoned: bool,
}

impl MemoryTransaction {
    fn ensure_usable(&self) -> StoreResult<()> {
        if self.poisoned {
            return Err(StoreError::Unavailable(
                "transaction is aborted, commands ignored until rollback".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceTransaction for MemoryTransaction {
    async fn insert_batch(&mut self, records: &[PriceRecord]) -> StoreResult<()> {
        self.ensure_usable()?;

        if let Some(latency) = self.faults.insert_latency {
            tokio::time::sleep(latency).await;
        }

        let committed_ids: HashSet<i64> = self.rows.read().await.iter().map(|r| r.id).collect();

        for record in records {
            if committed_ids.contains(&record.id) || !self.staged_ids.insert(record.id) {
                self.poisoned = true;
                return Err(StoreError::duplicate_id(record.id));
            }
            self.staged.push(record.clone());
        }

        Ok(())
    }

    async fn summarize(&mut self) -> StoreResult<AggregateSummary> {
        self.ensure_usable()?;

        let committed = self.rows.read().await;
        Ok(AggregateSummary::from_records(
            committed.iter().chain(self.staged.iter()),
        ))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.ensure_usable()?;

        if self.faults.fail_commit {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        if let Some(latency) = self.faults.commit_latency {
            tokio::time::sleep(latency).await;
        }

        let MemoryTransaction { rows, staged, .. } = *self;
        let mut committed = rows.write().await;

        let committed_ids: HashSet<i64> = committed.iter().map(|r| r.id).collect();
        if let Some(clash) = staged.iter().find(|r| committed_ids.contains(&r.id)) {
            return Err(StoreError::duplicate_id(clash.id));
        }

        committed.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        if let Some(latency) = self.faults.rollback_latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}
