pub mod response;

use crate::config::{Config, StoreBackend};
use crate::db::{self, MemoryPriceStore, PgPriceStore, PriceStore};
use crate::error::{AppError, AppResult};
use crate::features;
use crate::ingest::{IngestCoordinator, IngestSettings};
use crate::middleware;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PriceStore>,
    pub coordinator: Arc<IngestCoordinator>,
}

impl AppState {
    pub fn new(store: Arc<dyn PriceStore>, settings: IngestSettings) -> Self {
        let coordinator = Arc::new(IngestCoordinator::new(Arc::clone(&store), settings));
        Self { store, coordinator }
    }
}

/// Connect the configured store and wire the ingestion pipeline to it
pub async fn build_state(config: &Config) -> AppResult<AppState> {
    let store: Arc<dyn PriceStore> = match config.store {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            Arc::new(PgPriceStore::new(pool))
        },
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, uploaded prices are lost on restart");
            Arc::new(MemoryPriceStore::new())
        },
    };

    Ok(AppState::new(store, IngestSettings::from(&config.ingest)))
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, config: &Config) -> Router {
    let feature_state = features::FeatureState {
        store: Arc::clone(&state.store),
        coordinator: Arc::clone(&state.coordinator),
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v0", features::router(feature_state))
        // Apply layers from innermost to outermost
        .layer(middleware::upload_limit_layer(&config.ingest))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Prices Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> AppResult<Response> {
    state.store.ping().await.map_err(|e| {
        tracing::error!("Store health check failed: {:?}", e);
        AppError::Unavailable("store is not reachable".to_string())
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "store": "connected"
        })),
    )
        .into_response())
}
