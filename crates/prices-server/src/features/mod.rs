//! Feature slices of the prices API
//!
//! Each feature is a vertical slice with `commands/` (writes), `queries/`
//! (reads) and a `routes.rs` wiring them to HTTP.

pub mod prices;

use axum::Router;
use std::sync::Arc;

use crate::db::PriceStore;
use crate::ingest::IngestCoordinator;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub store: Arc<dyn PriceStore>,
    pub coordinator: Arc<IngestCoordinator>,
}

/// Mount every feature under its path prefix:
/// - `/prices` - archive upload and export
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/prices", prices::prices_routes().with_state(state))
}
