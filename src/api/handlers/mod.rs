pub mod admin;
pub mod auth;
pub mod health;
pub mod me;
pub mod tenants;
pub mod types;

// common functions for the handlers
use axum::{
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;

use super::state::AppState;
use crate::error::GateError;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Normalize and validate an email field.
pub(crate) fn email_field(email: &str) -> Result<String, GateError> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(GateError::Validation("invalid email".to_string()))
    }
}

/// Unwrap a JSON body, turning extractor failures into validation errors.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GateError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| GateError::Validation(rejection.body_text()))
}

/// Render a handler result, honouring debug mode for unexpected errors.
pub(crate) fn respond<T: IntoResponse>(state: &AppState, result: Result<T, GateError>) -> Response {
    match result {
        Ok(body) => body.into_response(),
        Err(error) => error.into_response_with(state.config().debug()),
    }
}
