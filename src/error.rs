//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the scheduling core returns [`Error`]. The
//! variants map 1:1 onto the error kinds the external HTTP surface needs to
//! distinguish (`NotFound` → 404, `Conflict` → 409, ...), so route handlers
//! convert `Result<T, Error>` straight into a response via [`IntoResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or incomplete request body/query.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Operation is invalid for the entity's current state (e.g. cancel of a
    /// terminal task).
    #[error("{0}")]
    Conflict(String),

    /// Path or resource access was disallowed.
    #[error("{0}")]
    Forbidden(String),

    /// An AI invocation or pool acquisition exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// The backing LLM transport was unreachable or errored.
    #[error("{0}")]
    Transport(String),

    /// The operation was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// A process was found non-terminal on restart with no owning executor.
    #[error("interrupted")]
    Interrupted,

    /// The session pool has been disposed.
    #[error("pool disposed")]
    PoolDisposed,

    /// Unexpected internal failure. Logged; never corrupts state.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::Interrupted => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PoolDisposed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}
