//! Error taxonomy surfaced by the gate and the auth endpoints.
//!
//! Every pipeline step converts collaborator failures into a `GateError`
//! before it reaches a response. The status code is derived from the error's
//! `ErrorKind` through a single table (`status_for`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

pub const UNEXPECTED_MESSAGE: &str = "unexpected error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Transport,
    Conflict,
    RateLimited,
    Unexpected,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("missing credentials")]
    MissingCredentials,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} is disabled")]
    Disabled(&'static str),
    #[error("{0} not found")]
    NotFound(String),
    #[error("encrypted transport required")]
    InsecureTransport,
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests, retry in {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl GateError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::AuthenticationFailed => ErrorKind::Authentication,
            Self::MissingCredentials | Self::Forbidden => ErrorKind::Authorization,
            Self::Disabled(_) | Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsecureTransport => ErrorKind::Transport,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        status_for(self.kind())
    }

    /// Wrap the error for rendering; `debug` controls whether internal
    /// messages of unexpected errors reach the caller.
    #[must_use]
    pub fn into_response_with(self, debug: bool) -> Response {
        ErrorResponse { error: self, debug }.into_response()
    }
}

/// Map an error kind to its HTTP status.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transport => StatusCode::NOT_ACCEPTABLE,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug)]
pub struct ErrorResponse {
    error: GateError,
    debug: bool,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: GateError, debug: bool) -> Self {
        Self { error, debug }
    }

    fn message(&self) -> String {
        match &self.error {
            GateError::Unexpected(err) if self.debug => format!("{err:#}"),
            GateError::Unexpected(_) => UNEXPECTED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        if let GateError::Unexpected(err) = &self.error {
            error!("unexpected error: {err:#}");
        }

        let status = self.error.status();
        let body = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.message(),
            }
        });

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        ErrorResponse::new(self, false).into_response()
    }
}
