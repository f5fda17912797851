//! Request-level error taxonomy and its mapping onto HTTP responses.
//!
//! Response bodies only ever carry the messages below.  Internal failures are
//! logged with their full error chain and answered with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::credentials::AuthError;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    /// A required request field was absent or empty.
    #[error("{message}")]
    MissingField {
        message: &'static str,
        usage: &'static str,
    },

    #[error("validation failed: {}", .details.join("; "))]
    Validation { details: Vec<String> },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request body must be a JSON object")]
    InvalidBody,

    #[error("failed to clone branch '{branch}': {detail}")]
    Clone { branch: String, detail: String },

    #[error("failed to commit: {detail}")]
    Commit { detail: String },

    #[error("failed to push to branch '{branch}': {detail}")]
    Push { branch: String, detail: String },

    /// The upstream answered the raw-content read with a non-200 status.
    #[error("upstream returned {status} for {file_path} at {branch}")]
    NotFoundOrDenied {
        status: u16,
        file_path: String,
        branch: String,
    },

    #[error("upstream request failed: {detail}")]
    Upstream { detail: String, timed_out: bool },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WhitelistError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingField { .. } | Self::Validation { .. } | Self::InvalidBody => {
                StatusCode::BAD_REQUEST
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Clone { .. } | Self::Commit { .. } | Self::Push { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFoundOrDenied { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Upstream { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::Validation { .. } => "validation",
            Self::Auth(_) => "auth",
            Self::InvalidBody => "invalid_body",
            Self::Clone { .. } => "clone",
            Self::Commit { .. } => "commit",
            Self::Push { .. } => "push",
            Self::NotFoundOrDenied { .. } => "not_found_or_denied",
            Self::Upstream { .. } => "upstream",
            Self::Internal(_) => "internal",
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::MissingField { message, usage } => json!({ "error": message, "usage": usage }),
            Self::Validation { details } => json!({
                "error": "Validation failed",
                "details": details,
            }),
            Self::Auth(err) => json!({ "error": err.client_message() }),
            Self::InvalidBody => json!({ "error": "Request body must be a JSON object" }),
            Self::Clone { branch, .. } => json!({
                "error": format!("Failed to clone branch '{branch}'"),
                "suggestion": format!("Make sure branch '{branch}' exists in the repository"),
            }),
            Self::Commit { detail } => json!({ "error": format!("Failed to commit: {detail}") }),
            Self::Push { branch, detail } => json!({
                "error": format!("Failed to push to branch '{branch}': {detail}"),
            }),
            Self::NotFoundOrDenied {
                status,
                file_path,
                branch,
            } => json!({
                "error": "File not found or access denied",
                "file_path": file_path,
                "branch": branch,
                "status_code": status,
            }),
            Self::Upstream { timed_out, .. } => json!({
                "error": if *timed_out {
                    "Timed out reading from the version-control host"
                } else {
                    "Failed to reach the version-control host"
                },
            }),
            Self::Internal(_) => json!({ "error": INTERNAL_ERROR_MESSAGE }),
        }
    }
}

impl IntoResponse for WhitelistError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!(error = %format!("{err:#}"), "internal server error"),
            Self::Clone { .. } | Self::Commit { .. } | Self::Push { .. } | Self::Upstream { .. } => {
                error!(error = %self, "request failed")
            }
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: WhitelistError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn clone_error_carries_suggestion() {
        let (status, body) = body_json(WhitelistError::Clone {
            branch: "jenkins-store-ort".into(),
            detail: "Remote branch not found".into(),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to clone branch 'jenkins-store-ort'");
        assert_eq!(
            body["suggestion"],
            "Make sure branch 'jenkins-store-ort' exists in the repository"
        );
        // Clone diagnostics stay in the log.
        assert!(!body.to_string().contains("Remote branch not found"));
    }

    #[tokio::test]
    async fn not_found_forwards_upstream_status() {
        let (status, body) = body_json(WhitelistError::NotFoundOrDenied {
            status: 403,
            file_path: "tenants/acme/Whitelist.csv".into(),
            branch: "jenkins-store-ort".into(),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status_code"], 403);
        assert_eq!(body["file_path"], "tenants/acme/Whitelist.csv");
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (status, body) =
            body_json(WhitelistError::Internal(anyhow::anyhow!("secret stack detail"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Internal server error" }));
    }

    #[tokio::test]
    async fn auth_error_is_unauthorized() {
        let (status, body) = body_json(AuthError::Missing.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Basic Authorization required");
    }

    #[test]
    fn upstream_timeout_maps_to_gateway_timeout() {
        let err = WhitelistError::Upstream {
            detail: "timed out".into(),
            timed_out: true,
        };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn odd_upstream_status_falls_back_to_bad_gateway() {
        let err = WhitelistError::NotFoundOrDenied {
            status: 42,
            file_path: String::new(),
            branch: String::new(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
