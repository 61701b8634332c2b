use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;
use uuid::Uuid;

use super::{check_subject, AuthFailure, Authenticator, AuthnError};
use crate::{
    identity::{AuthenticatedIdentity, Credential},
    store::{CredentialVerifier, IdentityStore},
};

pub struct PasswordAuthenticator {
    identities: Arc<dyn IdentityStore>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl PasswordAuthenticator {
    pub fn new(identities: Arc<dyn IdentityStore>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            identities,
            verifier,
        }
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError> {
        let Credential::Password { email, password } = credential else {
            return Err(AuthFailure::CredentialInvalid.into());
        };

        let Some(identity) = self.identities.find_by_email(email).await? else {
            // Same verification work as a known subject with a wrong password.
            self.verifier
                .verify_password(Uuid::nil(), password.expose_secret())
                .await?;
            return Err(AuthFailure::SubjectNotFound.into());
        };

        if !self
            .verifier
            .verify_password(identity.id, password.expose_secret())
            .await?
        {
            return Err(AuthFailure::CredentialInvalid.into());
        }

        Ok(check_subject(Some(identity), false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authn::tests::identity, clock::ManualClock, identity::TokenVerdict,
        store::memory::MemoryDirectory,
    };
    use anyhow::Result;
    use secrecy::SecretString;
    use std::sync::Mutex;

    /// Records which subjects had a password checked.
    #[derive(Default)]
    struct CountingVerifier {
        checked: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl CredentialVerifier for CountingVerifier {
        async fn verify_access_token(&self, _token: &str) -> anyhow::Result<TokenVerdict> {
            Ok(TokenVerdict::Invalid)
        }

        async fn verify_refresh_token(&self, _token: &str) -> anyhow::Result<TokenVerdict> {
            Ok(TokenVerdict::Invalid)
        }

        async fn verify_password(&self, id: Uuid, _password: &str) -> anyhow::Result<bool> {
            if let Ok(mut checked) = self.checked.lock() {
                checked.push(id);
            }
            Ok(false)
        }
    }

    fn password(email: &str, password: &str) -> Credential {
        Credential::Password {
            email: email.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }

    #[tokio::test]
    async fn password_outcomes() -> Result<()> {
        let directory = Arc::new(MemoryDirectory::new(Arc::new(ManualClock::default())));
        let alice = identity("alice@example.com");
        let mut pending = identity("pending@example.com");
        pending.verified = false;
        directory.insert_identity(alice.clone(), Some("s3cret")).await?;
        directory.insert_identity(pending.clone(), Some("s3cret")).await?;

        let authenticator = PasswordAuthenticator::new(directory.clone(), directory.clone());

        assert_eq!(
            authenticator
                .authenticate(&password("alice@example.com", "s3cret"))
                .await?
                .id,
            alice.id
        );
        assert!(matches!(
            authenticator
                .authenticate(&password("alice@example.com", "wrong"))
                .await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));
        assert!(matches!(
            authenticator
                .authenticate(&password("nobody@example.com", "s3cret"))
                .await,
            Err(AuthnError::Failure(AuthFailure::SubjectNotFound))
        ));
        assert!(matches!(
            authenticator
                .authenticate(&password("pending@example.com", "s3cret"))
                .await,
            Err(AuthnError::Failure(AuthFailure::SubjectUnverified))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_subject_still_runs_a_verification() -> Result<()> {
        let directory = Arc::new(MemoryDirectory::new(Arc::new(ManualClock::default())));
        let verifier = Arc::new(CountingVerifier::default());
        let authenticator = PasswordAuthenticator::new(directory, verifier.clone());

        assert!(matches!(
            authenticator
                .authenticate(&password("ghost@example.com", "s3cret"))
                .await,
            Err(AuthnError::Failure(AuthFailure::SubjectNotFound))
        ));
        let checked = verifier
            .checked
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(checked.as_slice(), &[Uuid::nil()]);
        Ok(())
    }
}
