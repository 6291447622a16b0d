use prices_common::AggregateSummary;
use tokio_util::sync::CancellationToken;

use crate::ingest::{IngestCoordinator, IngestError};

#[derive(Debug, Clone)]
pub struct UploadPricesCommand {
    pub filename: Option<String>,
    pub archive: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadPricesError {
    #[error("Multipart field 'file' is required")]
    FileRequired,
    #[error("Uploaded archive is empty")]
    ContentRequired,
    #[error("Failed to read upload: {0}")]
    Multipart(String),
    #[error("Upload exceeds the size limit: {0}")]
    TooLarge(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl UploadPricesCommand {
    pub fn validate(&self) -> Result<(), UploadPricesError> {
        if self.archive.is_empty() {
            return Err(UploadPricesError::ContentRequired);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(coordinator, command, cancel), fields(filename = ?command.filename, bytes = command.archive.len()))]
pub async fn handle(
    coordinator: &IngestCoordinator,
    command: UploadPricesCommand,
    cancel: CancellationToken,
) -> Result<AggregateSummary, UploadPricesError> {
    command.validate()?;

    let summary = coordinator.ingest(command.archive, cancel).await?;
    Ok(summary)
}
