//! Explicit authentication endpoints.
//!
//! Flow Overview:
//! 1) Login: password check, then either issue tokens or, with TFA enabled,
//!    issue a TFA challenge and stop.
//! 2) TFA / OTP verify: email + code against the purpose's challenge.
//! 3) Refresh: refresh token for a new bundle.
//! 4) Request endpoints (`otp`, `password/request`, `verification/request`)
//!    always look successful to the caller.
//! 5) Password reset and verification confirm consume their challenge and
//!    update the identity store.
//!
//! Every full sign-in clears all of the subject's challenges before tokens
//! are issued.

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    authn::{
        Authenticator, AuthnError, BearerTokenAuthenticator, EmailAuthenticator,
        OtpTokenAuthenticator, PasswordAuthenticator,
    },
    config::{GateConfig, OtpSettings},
    error::GateError,
    events::{AuthFlow, GateObserver},
    identity::{AuthenticatedIdentity, Credential, TokenBundle},
    otp::{ChallengeError, OtpChallengeManager, OtpPurpose},
    store::{CredentialVerifier, IdentityStore, TokenIssuer},
};

pub const MIN_PASSWORD_LENGTH: usize = 12;
pub const MAX_PASSWORD_LENGTH: usize = 256;

#[derive(Debug)]
pub enum LoginOutcome {
    Tokens(TokenBundle),
    /// Password accepted; a TFA challenge was issued instead of tokens.
    ChallengeIssued,
}

pub struct AuthFlows {
    config: Arc<GateConfig>,
    identities: Arc<dyn IdentityStore>,
    tokens: Arc<dyn TokenIssuer>,
    challenges: Arc<OtpChallengeManager>,
    observer: Arc<dyn GateObserver>,
    password: PasswordAuthenticator,
    email: EmailAuthenticator,
    unverified_email: EmailAuthenticator,
    refresh: BearerTokenAuthenticator,
    tfa: OtpTokenAuthenticator,
    otp: OtpTokenAuthenticator,
    password_reset: OtpTokenAuthenticator,
    verification: OtpTokenAuthenticator,
}

impl AuthFlows {
    pub fn new(
        config: Arc<GateConfig>,
        identities: Arc<dyn IdentityStore>,
        verifier: Arc<dyn CredentialVerifier>,
        tokens: Arc<dyn TokenIssuer>,
        challenges: Arc<OtpChallengeManager>,
        observer: Arc<dyn GateObserver>,
    ) -> Self {
        let otp_strategy = |purpose| {
            OtpTokenAuthenticator::new(identities.clone(), challenges.clone(), purpose)
        };
        Self {
            password: PasswordAuthenticator::new(identities.clone(), verifier.clone()),
            email: EmailAuthenticator::new(identities.clone()),
            unverified_email: EmailAuthenticator::new(identities.clone()).allow_unverified(true),
            refresh: BearerTokenAuthenticator::refresh(identities.clone(), verifier),
            tfa: otp_strategy(OtpPurpose::Tfa),
            otp: otp_strategy(OtpPurpose::Login),
            password_reset: otp_strategy(OtpPurpose::PasswordReset),
            verification: otp_strategy(OtpPurpose::Verification).allow_unverified(true),
            config,
            identities,
            tokens,
            challenges,
            observer,
        }
    }

    /// # Errors
    /// `Disabled` when password login is off, `AuthenticationFailed` for bad
    /// credentials, `Conflict` when a TFA challenge was issued too recently.
    pub async fn login(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<LoginOutcome, GateError> {
        if !self.config.password_enabled() {
            return Err(GateError::Disabled("password login"));
        }
        let credential = Credential::Password {
            email: email.to_string(),
            password,
        };
        let identity = self
            .authenticate(AuthFlow::Login, &self.password, &credential)
            .await?;

        let tfa = self.config.tfa();
        if tfa.enabled {
            return match self
                .challenges
                .create(identity.id, OtpPurpose::Tfa, tfa)
                .await
            {
                Ok(_) => Ok(LoginOutcome::ChallengeIssued),
                Err(ChallengeError::Conflict {
                    retry_after_seconds,
                }) => Err(GateError::Conflict(format!(
                    "two-factor code already sent, retry in {retry_after_seconds} seconds"
                ))),
                Err(ChallengeError::NotFound) => Err(GateError::Unexpected(anyhow::anyhow!(
                    "challenge vanished during creation"
                ))),
                Err(ChallengeError::Unexpected(err)) => Err(err.into()),
            };
        }

        self.complete(AuthFlow::Login, &identity)
            .await
            .map(LoginOutcome::Tokens)
    }

    /// # Errors
    /// `Disabled` unless password login and TFA are on; `AuthenticationFailed`.
    pub async fn verify_tfa(
        &self,
        email: &str,
        code: SecretString,
    ) -> Result<TokenBundle, GateError> {
        if !self.config.password_enabled() || !self.config.tfa().enabled {
            return Err(GateError::Disabled("two-factor authentication"));
        }
        let identity = self
            .authenticate(AuthFlow::Tfa, &self.tfa, &otp_credential(email, code))
            .await?;
        self.complete(AuthFlow::Tfa, &identity).await
    }

    /// Issue a login code. Unknown or ineligible subjects look identical to
    /// known ones.
    ///
    /// # Errors
    /// `Disabled` when OTP login is off; `Unexpected` on storage failure.
    pub async fn request_otp(&self, email: &str) -> Result<(), GateError> {
        let settings = *self.config.otp();
        if !settings.enabled {
            return Err(GateError::Disabled("one-time password login"));
        }
        self.issue_quietly(AuthFlow::Otp, &self.email, email, OtpPurpose::Login, &settings)
            .await
    }

    /// # Errors
    /// `Disabled` when OTP login is off; `AuthenticationFailed`.
    pub async fn verify_otp(
        &self,
        email: &str,
        code: SecretString,
    ) -> Result<TokenBundle, GateError> {
        if !self.config.otp().enabled {
            return Err(GateError::Disabled("one-time password login"));
        }
        let identity = self
            .authenticate(AuthFlow::Otp, &self.otp, &otp_credential(email, code))
            .await?;
        self.complete(AuthFlow::Otp, &identity).await
    }

    /// # Errors
    /// `Disabled` when refresh is off; `AuthenticationFailed`.
    pub async fn refresh(&self, refresh_token: SecretString) -> Result<TokenBundle, GateError> {
        if !self.config.refresh_enabled() {
            return Err(GateError::Disabled("token refresh"));
        }
        let identity = self
            .authenticate(
                AuthFlow::Refresh,
                &self.refresh,
                &Credential::Bearer(refresh_token),
            )
            .await?;
        self.complete(AuthFlow::Refresh, &identity).await
    }

    /// # Errors
    /// `Disabled` when password requests are off; `Unexpected` on storage failure.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), GateError> {
        let settings = *self.config.password_request();
        if !settings.enabled {
            return Err(GateError::Disabled("password reset"));
        }
        self.issue_quietly(
            AuthFlow::PasswordReset,
            &self.email,
            email,
            OtpPurpose::PasswordReset,
            &settings,
        )
        .await
    }

    /// # Errors
    /// `Disabled`, `Validation` for a weak password, `AuthenticationFailed`.
    pub async fn reset_password(
        &self,
        email: &str,
        code: SecretString,
        password: SecretString,
    ) -> Result<(), GateError> {
        if !self.config.password_request().enabled {
            return Err(GateError::Disabled("password reset"));
        }
        validate_password(&password)?;

        let identity = self
            .authenticate(
                AuthFlow::PasswordReset,
                &self.password_reset,
                &otp_credential(email, code),
            )
            .await?;
        self.identities
            .set_password(identity.id, &password)
            .await
            .context("Failed to store new password")?;
        self.challenges.invalidate_all(identity.id).await?;
        self.observer
            .on_auth_success(AuthFlow::PasswordReset, identity.id);
        info!(identity_id = %identity.id, "password reset");
        Ok(())
    }

    /// # Errors
    /// `Disabled` when verification is off; `Unexpected` on storage failure.
    pub async fn request_verification(&self, email: &str) -> Result<(), GateError> {
        let settings = *self.config.verification();
        if !settings.enabled {
            return Err(GateError::Disabled("email verification"));
        }
        self.issue_quietly(
            AuthFlow::Verification,
            &self.unverified_email,
            email,
            OtpPurpose::Verification,
            &settings,
        )
        .await
    }

    /// # Errors
    /// `Disabled` when verification is off; `AuthenticationFailed`.
    pub async fn confirm_verification(
        &self,
        email: &str,
        code: SecretString,
    ) -> Result<(), GateError> {
        if !self.config.verification().enabled {
            return Err(GateError::Disabled("email verification"));
        }
        let identity = self
            .authenticate(
                AuthFlow::Verification,
                &self.verification,
                &otp_credential(email, code),
            )
            .await?;
        self.identities
            .mark_verified(identity.id)
            .await
            .context("Failed to mark identity verified")?;
        self.observer
            .on_auth_success(AuthFlow::Verification, identity.id);
        Ok(())
    }

    async fn authenticate(
        &self,
        flow: AuthFlow,
        strategy: &dyn Authenticator,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, GateError> {
        match strategy.authenticate(credential).await {
            Ok(identity) => Ok(identity),
            Err(AuthnError::Failure(reason)) => {
                self.observer
                    .on_auth_failure(flow, credential.email(), reason);
                Err(GateError::AuthenticationFailed)
            }
            Err(AuthnError::Unexpected(err)) => Err(err.into()),
        }
    }

    /// Clear every challenge of the subject and issue a token bundle.
    async fn complete(
        &self,
        flow: AuthFlow,
        identity: &AuthenticatedIdentity,
    ) -> Result<TokenBundle, GateError> {
        self.challenges.invalidate_all(identity.id).await?;
        let bundle = self
            .tokens
            .issue(identity)
            .await
            .context("Failed to issue tokens")?;
        self.observer.on_auth_success(flow, identity.id);
        Ok(bundle)
    }

    /// Resolve the subject and issue a challenge; the caller learns nothing
    /// about unknown subjects or re-issue conflicts.
    async fn issue_quietly(
        &self,
        flow: AuthFlow,
        strategy: &EmailAuthenticator,
        email: &str,
        purpose: OtpPurpose,
        settings: &OtpSettings,
    ) -> Result<(), GateError> {
        let credential = Credential::Email {
            email: email.to_string(),
        };
        let identity = match strategy.authenticate(&credential).await {
            Ok(identity) => identity,
            Err(AuthnError::Failure(reason)) => {
                self.observer.on_auth_failure(flow, Some(email), reason);
                return Ok(());
            }
            Err(AuthnError::Unexpected(err)) => return Err(err.into()),
        };

        if purpose == OtpPurpose::Verification && identity.verified {
            debug!(identity_id = %identity.id, "already verified, no challenge issued");
            return Ok(());
        }

        match self.challenges.create(identity.id, purpose, settings).await {
            Ok(_) | Err(ChallengeError::NotFound) => Ok(()),
            Err(ChallengeError::Conflict {
                retry_after_seconds,
            }) => {
                debug!(retry_after_seconds, purpose = purpose.key(), "challenge re-issue suppressed");
                Ok(())
            }
            Err(ChallengeError::Unexpected(err)) => Err(err.into()),
        }
    }
}

fn otp_credential(email: &str, code: SecretString) -> Credential {
    Credential::OtpToken {
        email: email.to_string(),
        code,
    }
}

/// # Errors
/// `Validation` when the password is too short or too long.
pub fn validate_password(password: &SecretString) -> Result<(), GateError> {
    let length = password.expose_secret().chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(GateError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(GateError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
