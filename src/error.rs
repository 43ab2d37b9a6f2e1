//! Error taxonomy for the synchronous paths.
//!
//! Background loops never surface these to a caller - they log and keep
//! going. The ingestion path maps them onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::snapshots::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("invalid or missing API key")]
    Auth,
    #[error("access denied: no registered machine for addresses {0:?}")]
    Forbidden(Vec<String>),
    #[error("machine not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Persistence(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::Auth => StatusCode::UNAUTHORIZED,
            HubError::Forbidden(_) => StatusCode::FORBIDDEN,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Persistence(_) | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = Json(json!({ "success": false, "message": self.to_string() }));
        (code, body).into_response()
    }
}
