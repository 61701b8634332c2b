//! Credential authentication.
//!
//! Flow Overview:
//! 1) Extract the credentials a request presents (`PresentedCredentials`).
//! 2) `CredentialAuthenticator::identify` picks one strategy: bearer token
//!    first, then API key, otherwise the request carries no credentials.
//! 3) Strategy failures collapse into a uniform 403; the precise reason only
//!    reaches the log and the observer.
//!
//! The password, email and OTP strategies are driven by the explicit auth
//! endpoints in `flows` instead of per-request identification.

mod api_key;
mod bearer;
mod email;
mod otp_token;
mod password;

pub use api_key::ApiKeyAuthenticator;
pub use bearer::BearerTokenAuthenticator;
pub use email::EmailAuthenticator;
pub use otp_token::OtpTokenAuthenticator;
pub use password::PasswordAuthenticator;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use secrecy::SecretString;
use std::{net::IpAddr, sync::Arc};
use thiserror::Error;
use tracing::debug;

use crate::{
    error::GateError,
    events::{AuthFlow, GateObserver},
    identity::{AuthenticatedIdentity, Credential},
};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("credential invalid")]
    CredentialInvalid,
    #[error("credential expired")]
    CredentialExpired,
    #[error("subject not found")]
    SubjectNotFound,
    #[error("subject disabled")]
    SubjectDisabled,
    #[error("subject unverified")]
    SubjectUnverified,
    #[error("origin not allowed")]
    OriginNotAllowed,
}

impl AuthFailure {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CredentialInvalid => "credential_invalid",
            Self::CredentialExpired => "credential_expired",
            Self::SubjectNotFound => "subject_not_found",
            Self::SubjectDisabled => "subject_disabled",
            Self::SubjectUnverified => "subject_unverified",
            Self::OriginNotAllowed => "origin_not_allowed",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error(transparent)]
    Failure(#[from] AuthFailure),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError>;
}

/// Subject checks shared by every strategy.
///
/// # Errors
/// `SubjectNotFound`, `SubjectDisabled` or `SubjectUnverified`.
pub fn check_subject(
    identity: Option<AuthenticatedIdentity>,
    allow_unverified: bool,
) -> Result<AuthenticatedIdentity, AuthFailure> {
    let identity = identity.ok_or(AuthFailure::SubjectNotFound)?;
    if !identity.enabled {
        return Err(AuthFailure::SubjectDisabled);
    }
    if !identity.verified && !allow_unverified {
        return Err(AuthFailure::SubjectUnverified);
    }
    Ok(identity)
}

/// Credentials found on an inbound request.
#[derive(Debug, Default)]
pub struct PresentedCredentials {
    pub bearer: Option<Credential>,
    pub api_key: Option<Credential>,
}

impl PresentedCredentials {
    /// Read `Authorization: Bearer` and `X-API-Key`; empty values count as absent.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, client_ip: Option<IpAddr>) -> Self {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                let (scheme, token) = value.trim().split_once(' ')?;
                scheme
                    .eq_ignore_ascii_case("bearer")
                    .then(|| token.trim())
                    .filter(|token| !token.is_empty())
            })
            .map(|token| Credential::Bearer(SecretString::from(token.to_string())));

        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|key| Credential::ApiKey {
                key: SecretString::from(key.to_string()),
                origin_ip: client_ip,
                referer: headers
                    .get(axum::http::header::REFERER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string),
            });

        Self { bearer, api_key }
    }
}

/// Dispatches per-request identification for private endpoints.
pub struct CredentialAuthenticator {
    bearer: Option<BearerTokenAuthenticator>,
    api_key: Option<ApiKeyAuthenticator>,
    observer: Arc<dyn GateObserver>,
}

impl CredentialAuthenticator {
    /// `None` disables a strategy (`identity.token` / `identity.key`).
    pub fn new(
        bearer: Option<BearerTokenAuthenticator>,
        api_key: Option<ApiKeyAuthenticator>,
        observer: Arc<dyn GateObserver>,
    ) -> Self {
        Self {
            bearer,
            api_key,
            observer,
        }
    }

    /// Resolve the caller of a private endpoint.
    ///
    /// # Errors
    /// `MissingCredentials` when no enabled strategy has a credential,
    /// `Forbidden` for every strategy failure, `Unexpected` otherwise.
    pub async fn identify(
        &self,
        presented: &PresentedCredentials,
    ) -> Result<AuthenticatedIdentity, GateError> {
        let selected: Option<(&dyn Authenticator, &Credential)> =
            match (&self.bearer, &presented.bearer) {
                (Some(strategy), Some(credential)) => {
                    Some((strategy as &dyn Authenticator, credential))
                }
                _ => match (&self.api_key, &presented.api_key) {
                    (Some(strategy), Some(credential)) => {
                        Some((strategy as &dyn Authenticator, credential))
                    }
                    _ => None,
                },
            };

        let Some((strategy, credential)) = selected else {
            debug!("no usable credential presented");
            return Err(GateError::MissingCredentials);
        };

        match strategy.authenticate(credential).await {
            Ok(identity) => {
                self.observer.on_auth_success(AuthFlow::Identify, identity.id);
                Ok(identity)
            }
            Err(AuthnError::Failure(reason)) => {
                self.observer
                    .on_auth_failure(AuthFlow::Identify, credential.email(), reason);
                Err(GateError::Forbidden)
            }
            Err(AuthnError::Unexpected(err)) => Err(GateError::Unexpected(err)),
        }
    }
}
