//! Authentication endpoints.
//!
//! All routes here sit behind the `auth` gate policy: JSON content type and
//! the auth rate-limit bucket. Bodies are parsed here; the sequencing lives
//! in `flows::AuthFlows`.

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;

use super::{
    email_field, json_body, respond,
    types::{
        CodeRequest, EmailRequest, ErrorBody, LoginRequest, PasswordResetRequest, RefreshRequest,
    },
};
use crate::{api::state::AppState, error::GateError, flows::LoginOutcome, identity::TokenBundle};

fn created(bundle: TokenBundle) -> Response {
    (StatusCode::CREATED, Json(bundle)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Signed in", body = TokenBundle),
        (status = 204, description = "Password accepted, two-factor code issued"),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 404, description = "Password login disabled", body = ErrorBody),
        (status = 409, description = "Two-factor code issued too recently", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        let outcome = state
            .flows()
            .login(&email, SecretString::from(body.password))
            .await?;
        Ok::<_, GateError>(match outcome {
            LoginOutcome::Tokens(bundle) => created(bundle),
            LoginOutcome::ChallengeIssued => StatusCode::NO_CONTENT.into_response(),
        })
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/tfa/verify",
    request_body = CodeRequest,
    responses(
        (status = 201, description = "Signed in", body = TokenBundle),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "Two-factor authentication disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn tfa_verify(
    Extension(state): Extension<AppState>,
    payload: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        let bundle = state
            .flows()
            .verify_tfa(&email, SecretString::from(body.token))
            .await?;
        Ok::<_, GateError>(created(bundle))
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Code issued when the subject exists"),
        (status = 404, description = "One-time password login disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn otp_request(
    Extension(state): Extension<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        state.flows().request_otp(&email).await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = CodeRequest,
    responses(
        (status = 201, description = "Signed in", body = TokenBundle),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "One-time password login disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn otp_verify(
    Extension(state): Extension<AppState>,
    payload: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        let bundle = state
            .flows()
            .verify_otp(&email, SecretString::from(body.token))
            .await?;
        Ok::<_, GateError>(created(bundle))
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 201, description = "New token bundle", body = TokenBundle),
        (status = 401, description = "Invalid refresh token", body = ErrorBody),
        (status = 404, description = "Refresh disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    Extension(state): Extension<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let bundle = state
            .flows()
            .refresh(SecretString::from(body.refresh_token))
            .await?;
        Ok::<_, GateError>(created(bundle))
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/request",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Reset code issued when the subject exists"),
        (status = 404, description = "Password reset disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_request(
    Extension(state): Extension<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        state.flows().request_password_reset(&email).await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Weak password", body = ErrorBody),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "Password reset disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset(
    Extension(state): Extension<AppState>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        state
            .flows()
            .reset_password(
                &email,
                SecretString::from(body.token),
                SecretString::from(body.password),
            )
            .await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/verification/request",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Verification code issued when the subject is pending"),
        (status = 404, description = "Email verification disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verification_request(
    Extension(state): Extension<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        state.flows().request_verification(&email).await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}

#[utoipa::path(
    post,
    path = "/v1/auth/verification/confirm",
    request_body = CodeRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "Email verification disabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verification_confirm(
    Extension(state): Extension<AppState>,
    payload: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let body = json_body(payload)?;
        let email = email_field(&body.email)?;
        state
            .flows()
            .confirm_verification(&email, SecretString::from(body.token))
            .await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}
