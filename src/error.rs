//! Error taxonomy for the coordinator
//!
//! Store-level failures (`StoreError`) are mapped onto the caller-facing
//! `CoordinatorError`. Running out of pending codes is not an error and never
//! shows up here; see `ClaimOutcome::Exhausted`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors raised by the backing row store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row not found: {0}")]
    RowNotFound(String),
}

/// Errors surfaced to callers of the coordinator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Bad input, rejected before touching state
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Safe to retry with backoff; no partial state was left behind
    #[error("{0}")]
    Transient(String),
}

impl CoordinatorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::Transient(_))
    }

    /// Stable machine-readable code, used on the WebSocket feed
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "VALIDATION",
            CoordinatorError::Conflict(_) => "CONFLICT",
            CoordinatorError::NotFound(_) => "NOT_FOUND",
            CoordinatorError::Transient(_) => "TRANSIENT",
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => {
                CoordinatorError::Transient(format!("Storage unavailable: {}", msg))
            }
            StoreError::UniqueViolation(what) => {
                CoordinatorError::Conflict(format!("{} already exists", what))
            }
            StoreError::RowNotFound(what) => CoordinatorError::NotFound(format!("{} not found", what)),
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));

        if self.is_transient() {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
