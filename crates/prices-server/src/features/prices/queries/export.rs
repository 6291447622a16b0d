//! Re-export of the stored dataset as a zipped CSV

use prices_common::PriceRecord;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::db::{PriceStore, StoreError};
use crate::ingest::parser::DATE_FORMAT;

/// Name of the single entry inside the exported archive
pub const EXPORT_ENTRY_NAME: &str = "data.csv";

/// Download name offered to clients
pub const EXPORT_ARCHIVE_NAME: &str = "data.zip";

/// Header row of the exported entry
pub const EXPORT_HEADER: [&str; 5] = ["id", "created_at", "name", "category", "price"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportPricesQuery {}

#[derive(Debug, Clone)]
pub struct ExportPricesResponse {
    pub filename: String,
    pub rows: usize,
    pub archive: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportPricesError {
    #[error("Failed to read prices: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to encode export: {0}")]
    Encode(String),
}

impl From<csv::Error> for ExportPricesError {
    fn from(err: csv::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<zip::result::ZipError> for ExportPricesError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<std::io::Error> for ExportPricesError {
    fn from(err: std::io::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

#[tracing::instrument(skip(store))]
pub async fn handle(
    store: Arc<dyn PriceStore>,
    _query: ExportPricesQuery,
) -> Result<ExportPricesResponse, ExportPricesError> {
    let records = store.records().await?;
    let rows = records.len();

    let archive = tokio::task::spawn_blocking(move || encode_archive(&records))
        .await
        .map_err(|e| ExportPricesError::Encode(e.to_string()))??;

    tracing::debug!(rows, bytes = archive.len(), "Encoded price export");

    Ok(ExportPricesResponse {
        filename: EXPORT_ARCHIVE_NAME.to_string(),
        rows,
        archive,
    })
}

/// CSV body: header plus one line per record
pub fn encode_csv(records: &[PriceRecord]) -> Result<Vec<u8>, ExportPricesError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.created_at.format(DATE_FORMAT).to_string(),
            record.name.clone(),
            record.category.clone(),
            record.price.to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportPricesError::Encode(e.to_string()))
}

/// Zip holding [`EXPORT_ENTRY_NAME`]. The entry timestamp is fixed so equal
/// stores export to equal bytes.
pub fn encode_archive(records: &[PriceRecord]) -> Result<Vec<u8>, ExportPricesError> {
    let body = encode_csv(records)?;

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(EXPORT_ENTRY_NAME, options)?;
    zip.write_all(&body)?;

    Ok(zip.finish()?.into_inner())
}
