//! Upload totals

use prices_common::{AggregateSummary, PriceRecord};

use crate::config::SummaryScope;
use crate::db::{PriceTransaction, StoreResult};

/// Totals for an upload whose `records` were inserted through `tx`.
///
/// Store scope queries the transaction, so it must run before commit to see
/// exactly the state about to be committed.
pub async fn summarize(
    scope: SummaryScope,
    tx: &mut dyn PriceTransaction,
    records: &[PriceRecord],
) -> StoreResult<AggregateSummary> {
    match scope {
        SummaryScope::Store => tx.summarize().await,
        SummaryScope::Batch => Ok(AggregateSummary::from_records(records)),
    }
}
