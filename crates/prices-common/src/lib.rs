//! Prices Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types and the logging subsystem for the prices workspace.
//!
//! # Overview
//!
//! - **Types**: [`PriceRecord`] (one validated tabular row) and
//!   [`AggregateSummary`] (totals returned after an upload)
//! - **Logging**: tracing subscriber configuration shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use prices_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod types;

// Re-export commonly used types
pub use types::{AggregateSummary, PriceRecord, PRICE_SCALE};
