//! Prices Server Library
//!
//! HTTP service that ingests zipped CSV price lists into a relational store
//! and exports the stored dataset back as a zipped CSV.
//!
//! # Overview
//!
//! - **Ingestion**: archive extraction, row validation, one all-or-nothing
//!   transaction per upload, upload totals ([`ingest`])
//! - **Storage**: a transactional [`db::PriceStore`] capability backed by
//!   PostgreSQL (SQLx) or an in-process store
//! - **API**: `POST`/`GET /api/v0/prices` and `/health` ([`api`], [`features`])
//! - **Configuration**: environment-based ([`config`])
//!
//! # Example
//!
//! ```no_run
//! use prices_server::{api, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let state = api::build_state(&config).await?;
//!     let app = api::create_router(state, &config);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, AppResult};
