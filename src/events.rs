//! Observer side channel for authentication and challenge events.
//!
//! Delivery never influences the outcome of a request: the gate calls the
//! observer after it has decided, and the observer cannot fail.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{authn::AuthFailure, otp::IssuedChallenge};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFlow {
    Identify,
    Login,
    Tfa,
    Otp,
    Refresh,
    PasswordReset,
    Verification,
}

impl AuthFlow {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Login => "login",
            Self::Tfa => "tfa",
            Self::Otp => "otp",
            Self::Refresh => "refresh",
            Self::PasswordReset => "password_reset",
            Self::Verification => "verification",
        }
    }
}

pub trait GateObserver: Send + Sync {
    fn on_auth_success(&self, _flow: AuthFlow, _identity_id: Uuid) {}

    fn on_auth_failure(&self, _flow: AuthFlow, _subject_hint: Option<&str>, _reason: AuthFailure) {}

    /// Called once per stored challenge. Implementations own delivery of the code.
    fn on_challenge_issued(&self, _issued: &IssuedChallenge) {}
}

/// Structured log events; the code itself is never logged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl GateObserver for LogObserver {
    fn on_auth_success(&self, flow: AuthFlow, identity_id: Uuid) {
        info!(flow = flow.as_str(), identity_id = %identity_id, "authentication succeeded");
    }

    fn on_auth_failure(&self, flow: AuthFlow, subject_hint: Option<&str>, reason: AuthFailure) {
        warn!(
            flow = flow.as_str(),
            subject = subject_hint.unwrap_or("-"),
            reason = reason.as_str(),
            "authentication failed"
        );
    }

    fn on_challenge_issued(&self, issued: &IssuedChallenge) {
        let challenge = &issued.challenge;
        info!(
            subject_id = %challenge.subject_id,
            purpose = challenge.purpose.key(),
            expires_at = %challenge.expires_at,
            "challenge issued"
        );
    }
}

/// Development observer: logs like `LogObserver` and echoes codes so flows can
/// be exercised without a delivery channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct DevEchoObserver;

impl GateObserver for DevEchoObserver {
    fn on_auth_success(&self, flow: AuthFlow, identity_id: Uuid) {
        LogObserver.on_auth_success(flow, identity_id);
    }

    fn on_auth_failure(&self, flow: AuthFlow, subject_hint: Option<&str>, reason: AuthFailure) {
        LogObserver.on_auth_failure(flow, subject_hint, reason);
    }

    fn on_challenge_issued(&self, issued: &IssuedChallenge) {
        LogObserver.on_challenge_issued(issued);
        warn!(
            subject_id = %issued.challenge.subject_id,
            purpose = issued.challenge.purpose.key(),
            code = %issued.code,
            "debug mode: echoing one-time code"
        );
    }
}
