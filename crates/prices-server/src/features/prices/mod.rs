pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{UploadPricesCommand, UploadPricesError};

pub use queries::{ExportPricesError, ExportPricesQuery, ExportPricesResponse};

pub use routes::prices_routes;
