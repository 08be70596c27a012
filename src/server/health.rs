//! `GET /health`: answers `{"status":"ok"}` whenever the listener is up.
//!
//! It reads no configuration and runs no actions.

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok"}
/// ```
pub async fn health_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
