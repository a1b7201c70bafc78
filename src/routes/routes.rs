//! Routes for uploading and displaying files.
//!
//! - `POST /file/static`                     — multipart upload, returns the location
//! - `GET  /file/display/{bucket}/{file_id}` — serve a stored file inline
//! - `GET  /healthz`                         — liveness

use crate::{
    handlers::{
        file_handlers::{display, upload_static},
        health_handlers::healthz,
    },
    policy::UploadPolicy,
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub policy: Arc<UploadPolicy>,
}

impl AppState {
    pub fn new(storage: StorageService, policy: UploadPolicy) -> Self {
        Self {
            storage,
            policy: Arc::new(policy),
        }
    }
}

/// Build the router. Request bodies above `max_upload_bytes` are rejected.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/file/static", post(upload_static))
        .route("/file/display/{bucket}/{file_id}", get(display))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
