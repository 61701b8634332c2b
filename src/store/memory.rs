//! In-process collaborators.
//!
//! `MemoryBucketStore` and `MemoryChallengeStore` hold one `tokio` mutex per
//! map; every read-modify-write runs entirely under that lock.
//! `MemoryDirectory` stands in for the external identity service: it keeps
//! identities, API keys, grants, Argon2id password hashes and opaque tokens,
//! and can be loaded from a JSON directory file for development.

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    net::IpAddr,
    path::Path,
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{
    constant_time_eq, wait_remaining, BucketStore, BucketUpdate, ChallengeStore,
    CredentialVerifier, IdentityStore, InsertOutcome, PermissionStore, TokenIssuer,
};
use crate::{
    clock::Clock,
    identity::{ApiKeyRecord, AuthenticatedIdentity, TokenBundle, TokenKind, TokenVerdict},
    otp::{OtpChallenge, OtpPurpose},
    rate_limit::BucketState,
};

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Verified against when the subject has no stored password, so unknown and
/// known subjects cost the same.
static DUMMY_PASSWORD_HASH: Lazy<Option<String>> =
    Lazy::new(|| match hash_password("tollgate-dummy-password") {
        Ok(hash) => Some(hash),
        Err(err) => {
            error!("failed to prepare dummy password hash: {err:#}");
            None
        }
    });

#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl MemoryBucketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn transact(&self, fingerprint: &str, update: BucketUpdate<'_>) -> Result<BucketState> {
        let mut buckets = self.buckets.lock().await;
        let next = update(buckets.get(fingerprint).copied());
        buckets.insert(fingerprint.to_string(), next);
        Ok(next)
    }
}

#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<(Uuid, OtpPurpose), OtpChallenge>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn get(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>> {
        let challenges = self.challenges.lock().await;
        Ok(challenges.get(&(subject_id, purpose)).cloned())
    }

    async fn insert_unless_waiting(
        &self,
        challenge: &OtpChallenge,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut challenges = self.challenges.lock().await;
        let key = (challenge.subject_id, challenge.purpose);
        if let Some(retry_after_seconds) = challenges
            .get(&key)
            .and_then(|existing| wait_remaining(existing, now))
        {
            return Ok(InsertOutcome::Waiting {
                retry_after_seconds,
            });
        }
        challenges.insert(key, challenge.clone());
        Ok(InsertOutcome::Stored)
    }

    async fn consume(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut challenges = self.challenges.lock().await;
        let key = (subject_id, purpose);
        let matches = challenges.get(&key).is_some_and(|challenge| {
            !challenge.is_expired(now) && constant_time_eq(&challenge.code_hash, code_hash)
        });
        if matches {
            challenges.remove(&key);
        }
        Ok(matches)
    }

    async fn delete(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<()> {
        self.challenges.lock().await.remove(&(subject_id, purpose));
        Ok(())
    }

    async fn delete_all(&self, subject_id: Uuid) -> Result<()> {
        self.challenges
            .lock()
            .await
            .retain(|(subject, _), _| *subject != subject_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        challenges.retain(|_, challenge| !challenge.is_expired(now));
        Ok(u64::try_from(before - challenges.len()).unwrap_or(0))
    }
}

/// JSON layout accepted by `MemoryDirectory::load_file`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryFile {
    #[serde(default)]
    pub identities: Vec<DirectoryIdentity>,
    #[serde(default)]
    pub api_keys: Vec<DirectoryApiKey>,
    #[serde(default)]
    pub grants: Vec<DirectoryGrant>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryIdentity {
    #[serde(flatten)]
    pub identity: AuthenticatedIdentity,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryApiKey {
    pub key: String,
    pub identity_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowed_ips: Vec<IpAddr>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryGrant {
    pub tenant_id: Uuid,
    pub identity_id: Uuid,
    pub permission: String,
}

#[derive(Clone, Copy, Debug)]
struct IssuedToken {
    identity_id: Uuid,
    kind: TokenKind,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    identities: HashMap<Uuid, AuthenticatedIdentity>,
    /// PHC strings.
    passwords: HashMap<Uuid, String>,
    api_keys: HashMap<Vec<u8>, ApiKeyRecord>,
    grants: HashSet<(Uuid, Uuid, String)>,
    tokens: HashMap<Vec<u8>, IssuedToken>,
}

pub struct MemoryDirectory {
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECONDS),
            state: RwLock::new(DirectoryState::default()),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl = Duration::seconds(seconds);
        self
    }

    /// Build a directory from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load_file(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read directory file: {}", path.display()))?;
        let file: DirectoryFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid directory file: {}", path.display()))?;
        let directory = Self::new(clock);
        directory.import(file).await?;
        Ok(directory)
    }

    /// # Errors
    /// Returns an error if a password cannot be hashed.
    pub async fn import(&self, file: DirectoryFile) -> Result<()> {
        for entry in file.identities {
            self.insert_identity(entry.identity, entry.password.as_deref())
                .await?;
        }
        for key in file.api_keys {
            self.insert_api_key(
                &key.key,
                ApiKeyRecord {
                    identity_id: key.identity_id,
                    expires_at: key.expires_at,
                    allowed_ips: key.allowed_ips,
                    allowed_domains: key.allowed_domains,
                },
            )
            .await;
        }
        for grant in file.grants {
            self.grant(grant.tenant_id, grant.identity_id, &grant.permission)
                .await;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the password cannot be hashed.
    pub async fn insert_identity(
        &self,
        identity: AuthenticatedIdentity,
        password: Option<&str>,
    ) -> Result<()> {
        let hash = password.map(hash_password).transpose()?;
        let mut state = self.state.write().await;
        if let Some(hash) = hash {
            state.passwords.insert(identity.id, hash);
        }
        state.identities.insert(identity.id, identity);
        Ok(())
    }

    pub async fn insert_api_key(&self, key: &str, record: ApiKeyRecord) {
        self.state
            .write()
            .await
            .api_keys
            .insert(hash_secret(key), record);
    }

    /// Grant `permission` in `tenant_id`; also records tenant membership.
    pub async fn grant(&self, tenant_id: Uuid, identity_id: Uuid, permission: &str) {
        let mut state = self.state.write().await;
        if let Some(identity) = state.identities.get_mut(&identity_id) {
            identity.tenants.insert(tenant_id);
        }
        state
            .grants
            .insert((tenant_id, identity_id, permission.to_string()));
    }

    async fn verify_token(&self, token: &str, kind: TokenKind) -> TokenVerdict {
        let hash = hash_secret(token);
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(issued) = state.tokens.get(&hash).copied() else {
            return TokenVerdict::Invalid;
        };
        if issued.kind != kind {
            return TokenVerdict::Invalid;
        }
        if now >= issued.expires_at {
            state.tokens.remove(&hash);
            return TokenVerdict::Expired;
        }
        // Refresh tokens are single use.
        if kind == TokenKind::Refresh {
            state.tokens.remove(&hash);
        }
        TokenVerdict::Valid(issued.identity_id)
    }
}

#[async_trait]
impl IdentityStore for MemoryDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthenticatedIdentity>> {
        Ok(self.state.read().await.identities.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthenticatedIdentity>> {
        let email = email.trim();
        Ok(self
            .state
            .read()
            .await
            .identities
            .values()
            .find(|identity| identity.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self.state.read().await.api_keys.get(&hash_secret(key)).cloned())
    }

    #[instrument(skip(self, password))]
    async fn set_password(&self, id: Uuid, password: &SecretString) -> Result<()> {
        let hash = hash_password(password.expose_secret())?;
        let mut state = self.state.write().await;
        if !state.identities.contains_key(&id) {
            anyhow::bail!("unknown identity {id}");
        }
        state.passwords.insert(id, hash);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_verified(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let identity = state
            .identities
            .get_mut(&id)
            .with_context(|| format!("unknown identity {id}"))?;
        identity.verified = true;
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for MemoryDirectory {
    async fn verify_access_token(&self, token: &str) -> Result<TokenVerdict> {
        Ok(self.verify_token(token, TokenKind::Access).await)
    }

    async fn verify_refresh_token(&self, token: &str) -> Result<TokenVerdict> {
        Ok(self.verify_token(token, TokenKind::Refresh).await)
    }

    async fn verify_password(&self, id: Uuid, password: &str) -> Result<bool> {
        let stored = self.state.read().await.passwords.get(&id).cloned();
        match stored {
            Some(hash) => verify_password_hash(password, &hash),
            None => {
                if let Some(dummy) = DUMMY_PASSWORD_HASH.as_deref() {
                    let _ = verify_password_hash(password, dummy);
                }
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl TokenIssuer for MemoryDirectory {
    async fn issue(&self, identity: &AuthenticatedIdentity) -> Result<TokenBundle> {
        let access = generate_token()?;
        let refresh = generate_token()?;
        let now = self.clock.now();

        let mut state = self.state.write().await;
        state.tokens.retain(|_, issued| issued.expires_at > now);
        state.tokens.insert(
            hash_secret(&access),
            IssuedToken {
                identity_id: identity.id,
                kind: TokenKind::Access,
                expires_at: now + self.access_ttl,
            },
        );
        state.tokens.insert(
            hash_secret(&refresh),
            IssuedToken {
                identity_id: identity.id,
                kind: TokenKind::Refresh,
                expires_at: now + self.refresh_ttl,
            },
        );
        debug!(identity_id = %identity.id, "issued token bundle");

        Ok(TokenBundle {
            access,
            refresh,
            expires: self.access_ttl.num_seconds(),
        })
    }
}

#[async_trait]
impl PermissionStore for MemoryDirectory {
    async fn holds_all(
        &self,
        identity_id: Uuid,
        tenant_id: Uuid,
        permissions: &BTreeSet<String>,
    ) -> Result<bool> {
        let state = self.state.read().await;
        if permissions.is_empty() {
            return Ok(state
                .identities
                .get(&identity_id)
                .is_some_and(|identity| identity.tenants.contains(&tenant_id)));
        }
        Ok(permissions.iter().all(|permission| {
            state
                .grants
                .contains(&(tenant_id, identity_id, permission.clone()))
        }))
    }
}

/// Random URL-safe token; only its hash is kept.
fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_secret(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

fn verify_password_hash(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|_| anyhow::anyhow!("invalid password hash"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
