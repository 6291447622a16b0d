//! Reading one uploaded archive into an in-memory batch

use prices_common::PriceRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::archive::{ArchiveError, TabularArchive};
use super::parser::{self, RowError};
use super::IngestError;

/// Records parsed from one upload, plus what was read to get them
#[derive(Debug, Default)]
pub struct UploadBatch {
    /// Valid records, entries in listing order, rows in file order
    pub records: Vec<PriceRecord>,
    /// Rows skipped by validation
    pub rejected: u64,
    /// Tabular entries read
    pub entries: usize,
}

impl UploadBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Extract and validate every tabular entry of `bytes`.
///
/// Blocking; run it off the async runtime. `cancel` is checked between rows.
pub fn read_batch(bytes: Vec<u8>, cancel: &CancellationToken) -> Result<UploadBatch, IngestError> {
    let mut archive = TabularArchive::open(bytes)?;
    let mut batch = UploadBatch::default();

    for position in 0..archive.len() {
        let entry = archive.entry(position)?;
        let entry_name = entry.name;
        let mut accepted = 0usize;

        for (line, outcome) in parser::parse(entry.reader) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            match outcome {
                Ok(record) => {
                    batch.records.push(record);
                    accepted += 1;
                },
                Err(RowError::Unreadable(reason)) => {
                    return Err(ArchiveError::Unreadable {
                        name: entry_name,
                        reason,
                    }
                    .into());
                },
                Err(reason) => {
                    warn!(entry = %entry_name, line, %reason, "Skipping invalid row");
                    batch.rejected += 1;
                },
            }
        }

        batch.entries += 1;
        debug!(entry = %entry_name, accepted, "Parsed archive entry");
    }

    Ok(batch)
}
