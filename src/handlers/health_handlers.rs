//! Health handler.
//!
//! - GET /healthz  -> liveness plus the name of the active storage backend

use crate::routes::routes::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Cheap liveness probe. Never touches the backend.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
            storage: state.storage.backend_name().to_string(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    storage: String,
}
