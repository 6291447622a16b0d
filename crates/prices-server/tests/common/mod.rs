//! Shared helpers for prices-server integration tests
//!
//! - in-process zip archives and multipart bodies
//! - an app router over a [`MemoryPriceStore`]
//! - a PostgreSQL test container with migrations applied ([`TestPostgres`])

#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use prices_server::api::{self, AppState};
use prices_server::config::Config;
use prices_server::db::MemoryPriceStore;
use prices_server::ingest::IngestSettings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tower::ServiceExt;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const BOUNDARY: &str = "prices-test-boundary";

// ============================================================================
// Archives
// ============================================================================

/// Zip `members` in order
pub fn zip_archive(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in members {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(body.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Name and text of every entry in `bytes`
pub fn unzip(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|index| {
            let mut file = archive.by_index(index).expect("zip entry");
            let mut content = String::new();
            file.read_to_string(&mut content).expect("utf-8 entry");
            (file.name().to_string(), content)
        })
        .collect()
}

// ============================================================================
// HTTP
// ============================================================================

/// multipart/form-data body with one file field
pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/zip\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(field: &str, archive: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v0/prices")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, "prices.zip", archive)))
        .expect("request")
}

/// Router over `store` with default configuration
pub fn test_app(store: MemoryPriceStore) -> Router {
    test_app_with(store, Config::default())
}

pub fn test_app_with(store: MemoryPriceStore, config: Config) -> Router {
    let state = AppState::new(Arc::new(store), IngestSettings::from(&config.ingest));
    api::create_router(state, &config)
}

/// Send `request`, returning status, headers and the raw body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("router response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    (status, headers, body.to_vec())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send(app, request).await;
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the prices migration applied
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        prices_server::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}
