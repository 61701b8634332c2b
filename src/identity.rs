//! Credentials presented by callers and the identities they resolve to.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, net::IpAddr};
use utoipa::ToSchema;
use uuid::Uuid;

/// A credential as presented on a request. Never persisted.
#[derive(Debug)]
pub enum Credential {
    Bearer(SecretString),
    ApiKey {
        key: SecretString,
        origin_ip: Option<IpAddr>,
        referer: Option<String>,
    },
    Password {
        email: String,
        password: SecretString,
    },
    Email {
        email: String,
    },
    OtpToken {
        email: String,
        code: SecretString,
    },
}

impl Credential {
    /// Email the credential claims, used as the subject hint for failure events.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Password { email, .. } | Self::Email { email } | Self::OtpToken { email, .. } => {
                Some(email)
            }
            Self::Bearer(_) | Self::ApiKey { .. } => None,
        }
    }
}

/// Identity resolved for the lifetime of one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default = "default_true")]
    pub verified: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tenants: BTreeSet<Uuid>,
}

const fn default_true() -> bool {
    true
}

/// API key metadata owned by the identity store.
#[derive(Clone, Debug, Default)]
pub struct ApiKeyRecord {
    pub identity_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty means any IP.
    pub allowed_ips: Vec<IpAddr>,
    /// Referer host names; empty means any referer.
    pub allowed_domains: Vec<String>,
}

/// Outcome of checking an opaque token with the credential verifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid(Uuid),
    Invalid,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access: String,
    pub refresh: String,
    /// Access token lifetime in seconds.
    pub expires: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn credential_email_hint() {
        let credential = Credential::Password {
            email: "alice@example.com".to_string(),
            password: SecretString::from("secret"),
        };
        assert_eq!(credential.email(), Some("alice@example.com"));
        assert_eq!(Credential::Bearer(SecretString::from("t")).email(), None);
    }

    #[test]
    fn identity_flags_default_to_active() -> Result<()> {
        let identity: AuthenticatedIdentity = serde_json::from_value(serde_json::json!({
            "id": "0190f1f6-8a4e-7c39-9e8d-6f0b2a3c4d5e",
            "email": "bob@example.com"
        }))?;
        assert!(identity.enabled);
        assert!(identity.verified);
        assert!(!identity.admin);
        assert!(identity.tenants.is_empty());
        Ok(())
    }
}
