//! Collaborator seams.
//!
//! The gate never persists identities, grants or secrets itself; it talks to
//! these traits. `memory` backs tests and single-node development,
//! `postgres` backs the shared state (buckets and challenges) of a cluster.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    identity::{ApiKeyRecord, AuthenticatedIdentity, TokenBundle, TokenVerdict},
    otp::{hash_code, OtpChallenge, OtpPurpose},
    rate_limit::BucketState,
};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthenticatedIdentity>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<AuthenticatedIdentity>>;
    async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>>;
    async fn set_password(&self, id: Uuid, password: &SecretString) -> Result<()>;
    async fn mark_verified(&self, id: Uuid) -> Result<()>;
}

/// Pass/fail checks against secrets the gate never sees in stored form.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_access_token(&self, token: &str) -> Result<TokenVerdict>;
    async fn verify_refresh_token(&self, token: &str) -> Result<TokenVerdict>;
    async fn verify_password(&self, id: Uuid, password: &str) -> Result<bool>;

    /// Compare a stored code hash with the presented code in constant time.
    fn codes_match(&self, expected_hash: &[u8], presented: &str) -> bool {
        constant_time_eq(expected_hash, &hash_code(presented))
    }
}

#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, identity: &AuthenticatedIdentity) -> Result<TokenBundle>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Whether `identity_id` holds every permission in `permissions` within `tenant_id`.
    async fn holds_all(
        &self,
        identity_id: Uuid,
        tenant_id: Uuid,
        permissions: &BTreeSet<String>,
    ) -> Result<bool>;
}

/// Read-modify-write callback applied to a bucket under the store's lock.
pub type BucketUpdate<'a> = &'a mut (dyn FnMut(Option<BucketState>) -> BucketState + Send);

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Apply `update` to the bucket for `fingerprint` and persist the result.
    ///
    /// Implementations must serialize concurrent calls for the same
    /// fingerprint so no two callers observe the same pre-update level.
    async fn transact(&self, fingerprint: &str, update: BucketUpdate<'_>) -> Result<BucketState>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    /// An unexpired challenge is still inside its wait window.
    Waiting { retry_after_seconds: i64 },
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn get(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>>;

    /// Store `challenge`, replacing any previous one for the same pair unless
    /// that one is unexpired and still inside its wait window at `now`.
    async fn insert_unless_waiting(
        &self,
        challenge: &OtpChallenge,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Atomically delete the challenge for the pair if it is unexpired at
    /// `now` and its code hash equals `code_hash`. Returns whether a challenge
    /// was consumed; of two concurrent callers at most one sees `true`.
    async fn consume(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<()>;
    async fn delete_all(&self, subject_id: Uuid) -> Result<()>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}

/// Seconds left before a challenge created at `created_at` may be replaced.
pub(crate) fn wait_remaining(challenge: &OtpChallenge, now: DateTime<Utc>) -> Option<i64> {
    if challenge.is_expired(now) {
        return None;
    }
    let ready_at = challenge.created_at + chrono::Duration::seconds(challenge.wait_seconds);
    let remaining = (ready_at - now).num_seconds();
    if now < ready_at {
        Some(remaining.max(1))
    } else {
        None
    }
}
