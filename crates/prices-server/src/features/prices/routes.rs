use crate::api::response::ErrorResponse;
use crate::db::StoreError;
use crate::features::FeatureState;
use crate::ingest::IngestError;
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio_util::sync::CancellationToken;

use super::{
    commands::{UploadPricesCommand, UploadPricesError},
    queries::{ExportPricesError, ExportPricesQuery},
};

/// Multipart field carrying the archive
const FILE_FIELD: &str = "file";

pub fn prices_routes() -> Router<FeatureState> {
    Router::new().route("/", post(upload_prices).get(export_prices))
}

#[tracing::instrument(skip(state, multipart))]
async fn upload_prices(
    State(state): State<FeatureState>,
    mut multipart: Multipart,
) -> Result<Response, PricesApiError> {
    let mut archive: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(FILE_FIELD) {
            filename = field.file_name().map(|s| s.to_string());
            let data = field.bytes().await.map_err(multipart_error)?;
            archive = Some(data.to_vec());
        }
    }

    let archive = archive.ok_or(UploadPricesError::FileRequired)?;
    let command = UploadPricesCommand { filename, archive };

    // Dropping this handler (client went away) cancels the ingestion
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let summary = super::commands::upload::handle(&state.coordinator, command, cancel).await?;

    Ok((StatusCode::OK, Json(summary)).into_response())
}

#[tracing::instrument(skip(state))]
async fn export_prices(State(state): State<FeatureState>) -> Result<Response, PricesApiError> {
    let response =
        super::queries::export::handle(state.store.clone(), ExportPricesQuery::default()).await?;

    tracing::info!(rows = response.rows, bytes = response.archive.len(), "Prices exported via API");

    let disposition = format!("attachment; filename=\"{}\"", response.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        response.archive,
    )
        .into_response())
}

fn multipart_error(err: MultipartError) -> UploadPricesError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadPricesError::TooLarge(err.body_text())
    } else {
        UploadPricesError::Multipart(err.body_text())
    }
}

#[derive(Debug)]
enum PricesApiError {
    UploadError(UploadPricesError),
    ExportError(ExportPricesError),
}

impl From<UploadPricesError> for PricesApiError {
    fn from(err: UploadPricesError) -> Self {
        Self::UploadError(err)
    }
}

impl From<ExportPricesError> for PricesApiError {
    fn from(err: ExportPricesError) -> Self {
        Self::ExportError(err)
    }
}

impl PricesApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PricesApiError::UploadError(UploadPricesError::FileRequired)
            | PricesApiError::UploadError(UploadPricesError::ContentRequired)
            | PricesApiError::UploadError(UploadPricesError::Multipart(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            },
            PricesApiError::UploadError(UploadPricesError::TooLarge(_)) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            },
            PricesApiError::UploadError(UploadPricesError::Ingest(err)) => match err {
                IngestError::ArchiveCorrupt(_) => (StatusCode::BAD_REQUEST, "ARCHIVE_CORRUPT"),
                IngestError::Transaction(StoreError::Conflict(_)) => {
                    (StatusCode::CONFLICT, "CONFLICT")
                },
                IngestError::Transaction(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
                IngestError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "STORE_TIMEOUT"),
                IngestError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
                IngestError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            PricesApiError::ExportError(ExportPricesError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
            },
            PricesApiError::ExportError(ExportPricesError::Encode(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            },
        }
    }
}

impl IntoResponse for PricesApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            tracing::error!(code, "Prices request failed: {}", self);
            match status {
                StatusCode::INTERNAL_SERVER_ERROR => "An internal error occurred".to_string(),
                _ => self.to_string(),
            }
        } else {
            tracing::warn!(code, "Prices request rejected: {}", self);
            self.to_string()
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

impl std::fmt::Display for PricesApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UploadError(e) => write!(f, "{}", e),
            Self::ExportError(e) => write!(f, "{}", e),
        }
    }
}
