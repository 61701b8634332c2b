//! One-time challenge lifecycle.
//!
//! Flow Overview:
//! 1) `create` generates a code and stores it unless an unexpired challenge for
//!    the same (subject, purpose) is still inside its wait window.
//! 2) `read` treats expired challenges as absent (lazy expiry).
//! 3) `verify` compares codes in constant time and never deletes.
//! 4) `consume` checks and deletes in one store operation, so a code is
//!    accepted at most once even under concurrent requests.
//! 5) `invalidate` / `invalidate_all` delete challenges idempotently.
//!
//! Only a SHA-256 of each code is stored; the plaintext exists in the
//! [`IssuedChallenge`] handed to the observer and nowhere else.
//!
//! Purposes are independent: a TFA challenge never satisfies a password-reset
//! check and re-issuing one never touches the other.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::OtpSettings,
    events::GateObserver,
    store::{ChallengeStore, CredentialVerifier, InsertOutcome},
};

const NUMERIC: &[u8] = b"0123456789";
const ALPHABETIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    Tfa,
    Login,
    PasswordReset,
    Verification,
}

impl OtpPurpose {
    /// Storage key; never shared between purposes.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Tfa => "tfa",
            Self::Login => "otp",
            Self::PasswordReset => "password_request",
            Self::Verification => "verification",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "tfa" => Some(Self::Tfa),
            "otp" => Some(Self::Login),
            "password_request" => Some(Self::PasswordReset),
            "verification" => Some(Self::Verification),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpAlphabet {
    Numeric,
    Alphabetic,
    Alphanumeric,
}

impl OtpAlphabet {
    const fn symbols(self) -> &'static [u8] {
        match self {
            Self::Numeric => NUMERIC,
            Self::Alphabetic => ALPHABETIC,
            Self::Alphanumeric => ALPHANUMERIC,
        }
    }
}

impl FromStr for OtpAlphabet {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "numeric" => Ok(Self::Numeric),
            "alpha" | "alphabetic" => Ok(Self::Alphabetic),
            "alphanumeric" => Ok(Self::Alphanumeric),
            other => Err(format!(
                "unknown code type '{other}', expected numeric, alpha or alphanumeric"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpChallenge {
    pub subject_id: Uuid,
    pub purpose: OtpPurpose,
    pub code_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub wait_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

impl OtpChallenge {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A stored challenge together with the code it was created from.
#[derive(Clone)]
pub struct IssuedChallenge {
    pub challenge: OtpChallenge,
    pub code: String,
}

impl fmt::Debug for IssuedChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedChallenge")
            .field("challenge", &self.challenge)
            .field("code", &"[REDACTED]")
            .finish()
    }
}

/// Digest stored in place of a code. Surrounding whitespace is ignored.
#[must_use]
pub fn hash_code(code: &str) -> Vec<u8> {
    Sha256::digest(code.trim().as_bytes()).to_vec()
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge re-issued too soon, retry in {retry_after_seconds}s")]
    Conflict { retry_after_seconds: i64 },
    #[error("challenge not found")]
    NotFound,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub struct OtpChallengeManager {
    store: Arc<dyn ChallengeStore>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn GateObserver>,
}

impl OtpChallengeManager {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn GateObserver>,
    ) -> Self {
        Self {
            store,
            verifier,
            clock,
            observer,
        }
    }

    /// Issue a challenge for `subject_id` and notify the observer.
    ///
    /// # Errors
    /// `Conflict` while a previous challenge is inside its wait window,
    /// `Unexpected` on storage failure.
    #[instrument(skip(self, settings), fields(purpose = purpose.key()))]
    pub async fn create(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        settings: &OtpSettings,
    ) -> Result<IssuedChallenge, ChallengeError> {
        let now = self.clock.now();
        let code = generate_code(settings.length, settings.alphabet);
        let challenge = OtpChallenge {
            subject_id,
            purpose,
            code_hash: hash_code(&code),
            created_at: now,
            wait_seconds: settings.wait_seconds,
            expires_at: now + Duration::seconds(settings.duration_seconds),
        };

        match self
            .store
            .insert_unless_waiting(&challenge, now)
            .await
            .context("Failed to store challenge")?
        {
            InsertOutcome::Stored => {
                let issued = IssuedChallenge { challenge, code };
                self.observer.on_challenge_issued(&issued);
                Ok(issued)
            }
            InsertOutcome::Waiting {
                retry_after_seconds,
            } => {
                debug!(retry_after_seconds, "challenge still inside wait window");
                Err(ChallengeError::Conflict {
                    retry_after_seconds,
                })
            }
        }
    }

    /// # Errors
    /// `NotFound` when absent or expired.
    pub async fn read(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<OtpChallenge, ChallengeError> {
        let challenge = self
            .store
            .get(subject_id, purpose)
            .await
            .context("Failed to read challenge")?
            .ok_or(ChallengeError::NotFound)?;
        if challenge.is_expired(self.clock.now()) {
            return Err(ChallengeError::NotFound);
        }
        Ok(challenge)
    }

    /// Check `presented` against the live challenge. Never deletes.
    ///
    /// # Errors
    /// `NotFound` when absent or expired.
    pub async fn verify(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        presented: &str,
    ) -> Result<bool, ChallengeError> {
        let challenge = self.read(subject_id, purpose).await?;
        Ok(self.verifier.codes_match(&challenge.code_hash, presented))
    }

    /// Accept `presented` and delete the challenge in one step. A wrong code
    /// leaves the challenge in place.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    #[instrument(skip(self, presented), fields(purpose = purpose.key()))]
    pub async fn consume(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        presented: &str,
    ) -> anyhow::Result<bool> {
        let consumed = self
            .store
            .consume(subject_id, purpose, &hash_code(presented), self.clock.now())
            .await
            .context("Failed to consume challenge")?;
        if !consumed {
            debug!("no matching live challenge");
        }
        Ok(consumed)
    }

    /// # Errors
    /// Returns an error on storage failure; absence is not an error.
    pub async fn invalidate(&self, subject_id: Uuid, purpose: OtpPurpose) -> anyhow::Result<()> {
        self.store
            .delete(subject_id, purpose)
            .await
            .context("Failed to delete challenge")
    }

    /// # Errors
    /// Returns an error on storage failure.
    pub async fn invalidate_all(&self, subject_id: Uuid) -> anyhow::Result<()> {
        self.store
            .delete_all(subject_id)
            .await
            .context("Failed to delete challenges")
    }

    /// # Errors
    /// Returns an error on storage failure.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        self.store
            .purge_expired(self.clock.now())
            .await
            .context("Failed to purge expired challenges")
    }
}

fn generate_code(length: usize, alphabet: OtpAlphabet) -> String {
    let symbols = alphabet.symbols();
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(symbols[rng.gen_range(0..symbols.len())]))
        .collect()
}
