//! Liveness endpoint.
//!
//! The service holds no connections of its own, so health is static: it
//! reports the running version and the deployment environment from config.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::AppState;

pub const SERVICE_NAME: &str = "tenant-environment-api";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
}

impl HealthResponse {
    pub fn healthy(environment: impl Into<String>) -> Self {
        Self {
            status: "healthy",
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            environment: environment.into(),
        }
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse::healthy(
        state.config.service.environment.clone(),
    ))
}
