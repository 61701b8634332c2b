use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;

use super::{check_subject, AuthFailure, Authenticator, AuthnError};
use crate::{
    identity::{AuthenticatedIdentity, Credential},
    otp::{OtpChallengeManager, OtpPurpose},
    store::IdentityStore,
};

/// Email plus one-time code for a single challenge purpose. Subject checks
/// run first; the code is then checked and consumed in one store call.
pub struct OtpTokenAuthenticator {
    identities: Arc<dyn IdentityStore>,
    challenges: Arc<OtpChallengeManager>,
    purpose: OtpPurpose,
    allow_unverified: bool,
}

impl OtpTokenAuthenticator {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        challenges: Arc<OtpChallengeManager>,
        purpose: OtpPurpose,
    ) -> Self {
        Self {
            identities,
            challenges,
            purpose,
            allow_unverified: false,
        }
    }

    #[must_use]
    pub fn allow_unverified(mut self, allow: bool) -> Self {
        self.allow_unverified = allow;
        self
    }
}

#[async_trait]
impl Authenticator for OtpTokenAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError> {
        let Credential::OtpToken { email, code } = credential else {
            return Err(AuthFailure::CredentialInvalid.into());
        };

        let identity = self
            .identities
            .find_by_email(email)
            .await?
            .ok_or(AuthFailure::SubjectNotFound)?;

        let identity = check_subject(Some(identity), self.allow_unverified)?;

        if !self
            .challenges
            .consume(identity.id, self.purpose, code.expose_secret())
            .await?
        {
            return Err(AuthFailure::CredentialInvalid.into());
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authn::tests::identity,
        clock::ManualClock,
        config::OtpSettings,
        events::LogObserver,
        otp::{OtpAlphabet, OtpChallenge},
        store::{
            memory::{MemoryChallengeStore, MemoryDirectory},
            ChallengeStore, InsertOutcome,
        },
    };
    use anyhow::Result;
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;
    use uuid::Uuid;

    /// Yields on every call, like a store behind a network hop.
    struct YieldingStore(MemoryChallengeStore);

    #[async_trait]
    impl ChallengeStore for YieldingStore {
        async fn get(
            &self,
            subject_id: Uuid,
            purpose: OtpPurpose,
        ) -> Result<Option<OtpChallenge>> {
            tokio::task::yield_now().await;
            self.0.get(subject_id, purpose).await
        }

        async fn insert_unless_waiting(
            &self,
            challenge: &OtpChallenge,
            now: DateTime<Utc>,
        ) -> Result<InsertOutcome> {
            self.0.insert_unless_waiting(challenge, now).await
        }

        async fn consume(
            &self,
            subject_id: Uuid,
            purpose: OtpPurpose,
            code_hash: &[u8],
            now: DateTime<Utc>,
        ) -> Result<bool> {
            tokio::task::yield_now().await;
            self.0.consume(subject_id, purpose, code_hash, now).await
        }

        async fn delete(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.delete(subject_id, purpose).await
        }

        async fn delete_all(&self, subject_id: Uuid) -> Result<()> {
            self.0.delete_all(subject_id).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
            self.0.purge_expired(now).await
        }
    }

    fn token(email: &str, code: &str) -> Credential {
        Credential::OtpToken {
            email: email.to_string(),
            code: SecretString::from(code.to_string()),
        }
    }

    #[tokio::test]
    async fn consumes_only_on_success() -> Result<()> {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()));
        let challenges = Arc::new(OtpChallengeManager::new(
            Arc::new(MemoryChallengeStore::new()),
            directory.clone(),
            clock.clone(),
            Arc::new(LogObserver),
        ));
        let alice = identity("alice@example.com");
        directory.insert_identity(alice.clone(), None).await?;

        let settings = OtpSettings::new(60, 300, 6, OtpAlphabet::Numeric).enabled(true);
        let challenge = challenges
            .create(alice.id, OtpPurpose::Tfa, &settings)
            .await?;

        let tfa = OtpTokenAuthenticator::new(directory.clone(), challenges.clone(), OtpPurpose::Tfa);
        let login =
            OtpTokenAuthenticator::new(directory.clone(), challenges.clone(), OtpPurpose::Login);

        // Wrong purpose and wrong code both fail without consuming.
        assert!(matches!(
            login
                .authenticate(&token("alice@example.com", &challenge.code))
                .await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));
        assert!(matches!(
            tfa.authenticate(&token("alice@example.com", "bad")).await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));

        let resolved = tfa
            .authenticate(&token("alice@example.com", &challenge.code))
            .await?;
        assert_eq!(resolved.id, alice.id);

        // Replay fails once consumed.
        assert!(matches!(
            tfa.authenticate(&token("alice@example.com", &challenge.code))
                .await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_with_one_code_succeed_once() -> Result<()> {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()));
        let challenges = Arc::new(OtpChallengeManager::new(
            Arc::new(YieldingStore(MemoryChallengeStore::new())),
            directory.clone(),
            clock.clone(),
            Arc::new(LogObserver),
        ));
        let alice = identity("alice@example.com");
        directory.insert_identity(alice.clone(), None).await?;

        let settings = OtpSettings::new(60, 300, 6, OtpAlphabet::Numeric).enabled(true);
        let issued = challenges
            .create(alice.id, OtpPurpose::Login, &settings)
            .await?;
        let otp = OtpTokenAuthenticator::new(directory.clone(), challenges, OtpPurpose::Login);
        let credential = token("alice@example.com", &issued.code);

        let (first, second) = tokio::join!(
            otp.authenticate(&credential),
            otp.authenticate(&credential)
        );
        assert_eq!(
            [first.is_ok(), second.is_ok()]
                .iter()
                .filter(|ok| **ok)
                .count(),
            1
        );
        Ok(())
    }
}
