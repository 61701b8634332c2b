//! Postgres-backed shared state for multi-instance deployments.
//!
//! Flow Overview:
//! 1) `PgBucketStore::transact` seeds the bucket row, locks it with
//!    `SELECT ... FOR UPDATE`, applies the update and commits, so concurrent
//!    instances serialize per fingerprint.
//! 2) `PgChallengeStore::insert_unless_waiting` is a single conditional
//!    upsert; the row is only replaced when the existing challenge is expired
//!    or past its wait window.
//! 3) `PgChallengeStore::consume` is a single conditional `DELETE ... RETURNING`,
//!    so one code is accepted by at most one caller across instances.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{instrument, Instrument};
use uuid::Uuid;

use super::{wait_remaining, BucketStore, BucketUpdate, ChallengeStore, InsertOutcome};
use crate::{
    otp::{OtpChallenge, OtpPurpose},
    rate_limit::BucketState,
};

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

/// Connect and make sure the gate tables exist.
///
/// # Errors
/// Returns an error if the connection or the schema statements fail.
pub async fn connect(dsn: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let span = tracing::info_span!("db.query", db.system = "postgresql", db.operation = "DDL");
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .instrument(span)
        .await
        .context("Failed to apply gate schema")?;

    Ok(pool)
}

#[derive(Clone, Debug)]
pub struct PgBucketStore {
    pool: PgPool,
}

impl PgBucketStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BucketStore for PgBucketStore {
    #[instrument(skip(self, update))]
    async fn transact(&self, fingerprint: &str, update: BucketUpdate<'_>) -> Result<BucketState> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin bucket transaction")?;

        let seed_query = r"
            INSERT INTO rate_limit_buckets (fingerprint)
            VALUES ($1)
            ON CONFLICT (fingerprint) DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = seed_query
        );
        sqlx::query(seed_query)
            .bind(fingerprint)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to seed bucket")?;

        let lock_query = r"
            SELECT level, updated_at
            FROM rate_limit_buckets
            WHERE fingerprint = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = lock_query
        );
        let row = sqlx::query(lock_query)
            .bind(fingerprint)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock bucket")?;
        let previous = row
            .get::<Option<DateTime<Utc>>, _>("updated_at")
            .map(|updated_at| BucketState {
                level: row.get("level"),
                updated_at,
            });

        let next = update(previous);

        let write_query = r"
            UPDATE rate_limit_buckets
            SET level = $2, updated_at = $3
            WHERE fingerprint = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = write_query
        );
        sqlx::query(write_query)
            .bind(fingerprint)
            .bind(next.level)
            .bind(next.updated_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to write bucket")?;

        tx.commit()
            .await
            .context("failed to commit bucket transaction")?;
        Ok(next)
    }
}

#[derive(Clone, Debug)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn challenge_from_row(row: &sqlx::postgres::PgRow) -> Result<OtpChallenge> {
    let purpose: String = row.get("purpose");
    Ok(OtpChallenge {
        subject_id: row.get("subject_id"),
        purpose: OtpPurpose::from_key(&purpose)
            .with_context(|| format!("unknown challenge purpose '{purpose}'"))?,
        code_hash: row.get("code_hash"),
        created_at: row.get("created_at"),
        wait_seconds: row.get("wait_seconds"),
        expires_at: row.get("expires_at"),
    })
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn get(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>> {
        let query = r"
            SELECT subject_id, purpose, code_hash, created_at, wait_seconds, expires_at
            FROM otp_challenges
            WHERE subject_id = $1 AND purpose = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(purpose.key())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load challenge")?;
        row.as_ref().map(challenge_from_row).transpose()
    }

    #[instrument(skip(self, challenge), fields(subject_id = %challenge.subject_id, purpose = challenge.purpose.key()))]
    async fn insert_unless_waiting(
        &self,
        challenge: &OtpChallenge,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let upsert_query = r"
            INSERT INTO otp_challenges (subject_id, purpose, code_hash, created_at, wait_seconds, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (subject_id, purpose) DO UPDATE
            SET code_hash = EXCLUDED.code_hash,
                created_at = EXCLUDED.created_at,
                wait_seconds = EXCLUDED.wait_seconds,
                expires_at = EXCLUDED.expires_at
            WHERE otp_challenges.expires_at <= $7
               OR otp_challenges.created_at + make_interval(secs => otp_challenges.wait_seconds) <= $7
            RETURNING subject_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = upsert_query
        );
        let stored = sqlx::query(upsert_query)
            .bind(challenge.subject_id)
            .bind(challenge.purpose.key())
            .bind(&challenge.code_hash)
            .bind(challenge.created_at)
            .bind(challenge.wait_seconds)
            .bind(challenge.expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert challenge")?;

        if stored.is_some() {
            return Ok(InsertOutcome::Stored);
        }

        // The conditional update skipped the row: report the remaining wait.
        let existing = self.get(challenge.subject_id, challenge.purpose).await?;
        let retry_after_seconds = existing
            .as_ref()
            .and_then(|existing| wait_remaining(existing, now))
            .unwrap_or(1);
        Ok(InsertOutcome::Waiting {
            retry_after_seconds,
        })
    }

    #[instrument(skip(self, code_hash), fields(purpose = purpose.key()))]
    async fn consume(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            DELETE FROM otp_challenges
            WHERE subject_id = $1
              AND purpose = $2
              AND code_hash = $3
              AND expires_at > $4
            RETURNING subject_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let consumed = sqlx::query(query)
            .bind(subject_id)
            .bind(purpose.key())
            .bind(code_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume challenge")?;
        Ok(consumed.is_some())
    }

    async fn delete(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<()> {
        let query = "DELETE FROM otp_challenges WHERE subject_id = $1 AND purpose = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .bind(purpose.key())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete challenge")?;
        Ok(())
    }

    async fn delete_all(&self, subject_id: Uuid) -> Result<()> {
        let query = "DELETE FROM otp_challenges WHERE subject_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete challenges")?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM otp_challenges WHERE expires_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired challenges")?;
        Ok(result.rows_affected())
    }
}
