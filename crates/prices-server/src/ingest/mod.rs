//! Upload ingestion pipeline
//!
//! archive bytes → [`archive`] (tabular entries) → [`parser`] (validated rows)
//! → [`batch`] (in-memory upload batch) → [`coordinator`] (one store
//! transaction, [`summary`] totals, commit).

pub mod archive;
pub mod batch;
pub mod coordinator;
pub mod parser;
pub mod summary;

pub use archive::{ArchiveError, TabularArchive};
pub use batch::{read_batch, UploadBatch};
pub use coordinator::{IngestCoordinator, IngestError, IngestSettings};
pub use parser::{ColumnLayout, RowError};
