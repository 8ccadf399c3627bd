//! Route modules for the field sync server

pub mod features;
pub mod health;
pub mod sync;

use axum::{body::Bytes, routing::get, Router};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Full application router (without middleware layers)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest(
            "/api/v1/projects/:project_id",
            sync::router().merge(features::router()),
        )
        .with_state(state)
}

/// Project ids arrive as path text; anything non-numeric is a bad request
pub(crate) fn parse_project_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid project id: {}", raw)))
}

/// Bodies are parsed by hand so malformed JSON gets the standard error body
pub(crate) fn parse_json_body(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Request body is not valid JSON: {}", e)))
}
