//! Axum router and request handlers for the whitelist API.
//!
//! Routes:
//! - `POST     /whitelist/add`  - Append an entry to a tenant's whitelist
//! - `GET|POST /whitelist/view` - Read a tenant's whitelist
//! - `GET      /health`         - Liveness
//! - `GET      /metrics`        - Prometheus metrics
//!
//! Unknown routes, wrong methods and panics all answer with a JSON body.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

use crate::AppState;
use crate::credentials::Credentials;
use crate::error::{INTERNAL_ERROR_MESSAGE, WhitelistError};
use crate::forge::{AppendRequest, FetchRequest};
use crate::metrics::Endpoint;
use crate::naming::{WhitelistTarget, branch_name};
use crate::validation::{validate_environment, validate_file_name, validate_input, validate_tenant};

use super::params::RequestParams;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;
    Router::new()
        .route("/whitelist/add", post(handle_add))
        .route("/whitelist/view", get(handle_view_get).post(handle_view_post))
        .route("/health", get(crate::health::health_handler))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_method_not_allowed)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AddResponse {
    status: &'static str,
    message: String,
    entry: String,
    environment: String,
    branch: String,
    tenant: String,
    folder: String,
    file: String,
    file_path: String,
    commit_message: String,
}

#[derive(Debug, Serialize)]
struct ViewResponse {
    status: &'static str,
    content: String,
    lines: Vec<String>,
    line_count: usize,
    environment: String,
    branch: String,
    tenant: String,
    folder: String,
    file: String,
    file_path: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /whitelist/add`
#[instrument(skip_all)]
async fn handle_add(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = add_entry(&state, query, &headers, &body).await;
    finish(&state, Endpoint::Add, result)
}

/// `GET /whitelist/view`: query string only.
#[instrument(skip_all)]
async fn handle_view_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let result = view_entries(&state, RequestParams::from_query(query), &headers).await;
    finish(&state, Endpoint::View, result)
}

/// `POST /whitelist/view`: query string, then JSON body.
#[instrument(skip_all)]
async fn handle_view_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let params = RequestParams::parse(query, &body)?;
        view_entries(&state, params, &headers).await
    }
    .await;
    finish(&state, Endpoint::View, result)
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            WhitelistError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")).into_response()
        }
    }
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found" })),
    )
        .into_response()
}

async fn handle_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_ERROR_MESSAGE })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Request flows
// ---------------------------------------------------------------------------

async fn add_entry(
    state: &AppState,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<AddResponse, WhitelistError> {
    // 1. Resolve fields.
    let fields = RequestParams::parse(query, body)?.add_fields();

    let entry = fields.entry.ok_or(WhitelistError::MissingField {
        message: "Entry field is required",
        usage: "Include 'entry' in JSON body or as query parameter",
    })?;
    let environment = fields.environment.ok_or(WhitelistError::MissingField {
        message: "Environment field is required",
        usage: "Use ?environment=ort or include in JSON body",
    })?;
    let tenant = fields.tenant.ok_or(WhitelistError::MissingField {
        message: "Tenant field is required",
        usage: "Use ?tenant=<tenant> or include in JSON body",
    })?;
    let file = fields.file;

    // 2. Validate before touching credentials.
    let mut details = validate_input(&entry, Some(&environment), Some(&tenant));
    details.extend(validate_file_name(&file));
    if !details.is_empty() {
        return Err(WhitelistError::Validation { details });
    }

    // 3. Credentials.
    let credentials = Credentials::from_authorization(authorization(headers))?;

    // 4. Mutate.
    let branch = branch_name(&environment);
    let target = WhitelistTarget::for_write(&tenant, &file);
    info!(%branch, %tenant, user = %credentials.username, "add requested");

    let outcome = state
        .backend
        .append_entry(&AppendRequest {
            credentials,
            branch: branch.clone(),
            target: target.clone(),
            entry: entry.clone(),
            tenant: tenant.clone(),
            environment: environment.clone(),
        })
        .await?;

    Ok(AddResponse {
        status: "success",
        message: format!(
            "Entry added successfully to {} in {environment} environment",
            target.file_path
        ),
        entry,
        environment,
        branch,
        tenant,
        folder: target.folder,
        file: target.file,
        file_path: target.file_path,
        commit_message: outcome.commit_message,
    })
}

async fn view_entries(
    state: &AppState,
    params: RequestParams,
    headers: &HeaderMap,
) -> Result<ViewResponse, WhitelistError> {
    let fields = params.view_fields();
    let (Some(environment), Some(tenant)) = (fields.environment, fields.tenant) else {
        return Err(WhitelistError::MissingField {
            message: "Environment and tenant are required",
            usage: "Use ?environment=ort&tenant=<tenant> or include in JSON body",
        });
    };
    let file = fields.file;

    let details: Vec<String> = [
        validate_environment(&environment),
        validate_tenant(&tenant),
        validate_file_name(&file),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !details.is_empty() {
        return Err(WhitelistError::Validation { details });
    }

    let credentials = Credentials::from_authorization(authorization(headers))?;

    let branch = branch_name(&environment);
    let target = WhitelistTarget::for_read(&tenant, &file);

    let raw = state
        .backend
        .fetch_raw(&FetchRequest {
            credentials,
            branch: branch.clone(),
            file_path: target.file_path.clone(),
        })
        .await?;

    let line_count = raw.line_count();
    Ok(ViewResponse {
        status: "success",
        content: raw.content,
        lines: raw.lines,
        line_count,
        environment,
        branch,
        tenant,
        folder: target.folder,
        file: target.file,
        file_path: target.file_path,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A header that is present but not visible ASCII is treated as absent.
fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

fn finish<T: Serialize>(
    state: &AppState,
    endpoint: Endpoint,
    result: Result<T, WhitelistError>,
) -> Response {
    match result {
        Ok(body) => {
            state.metrics.record_request(endpoint, "success");
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            state.metrics.record_request(endpoint, err.kind());
            err.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
