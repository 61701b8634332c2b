use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;

use super::{check_subject, AuthFailure, Authenticator, AuthnError};
use crate::{
    identity::{AuthenticatedIdentity, Credential, TokenKind, TokenVerdict},
    store::{CredentialVerifier, IdentityStore},
};

/// Opaque bearer tokens, in access mode for identification or refresh mode
/// for the refresh endpoint.
pub struct BearerTokenAuthenticator {
    identities: Arc<dyn IdentityStore>,
    verifier: Arc<dyn CredentialVerifier>,
    kind: TokenKind,
}

impl BearerTokenAuthenticator {
    pub fn access(
        identities: Arc<dyn IdentityStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            identities,
            verifier,
            kind: TokenKind::Access,
        }
    }

    pub fn refresh(
        identities: Arc<dyn IdentityStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            identities,
            verifier,
            kind: TokenKind::Refresh,
        }
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError> {
        let Credential::Bearer(token) = credential else {
            return Err(AuthFailure::CredentialInvalid.into());
        };

        let verdict = match self.kind {
            TokenKind::Access => {
                self.verifier
                    .verify_access_token(token.expose_secret())
                    .await?
            }
            TokenKind::Refresh => {
                self.verifier
                    .verify_refresh_token(token.expose_secret())
                    .await?
            }
        };

        let subject_id = match verdict {
            TokenVerdict::Valid(id) => id,
            TokenVerdict::Invalid => return Err(AuthFailure::CredentialInvalid.into()),
            TokenVerdict::Expired => return Err(AuthFailure::CredentialExpired.into()),
        };

        let identity = self.identities.find_by_id(subject_id).await?;
        Ok(check_subject(identity, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authn::tests::identity,
        clock::ManualClock,
        store::{memory::MemoryDirectory, TokenIssuer},
    };
    use anyhow::Result;
    use secrecy::SecretString;

    fn bearer(token: &str) -> Credential {
        Credential::Bearer(SecretString::from(token.to_string()))
    }

    #[tokio::test]
    async fn access_and_refresh_modes() -> Result<()> {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()).with_access_ttl_seconds(30));
        let alice = identity("alice@example.com");
        directory.insert_identity(alice.clone(), None).await?;
        let bundle = directory.issue(&alice).await?;

        let access = BearerTokenAuthenticator::access(directory.clone(), directory.clone());
        let refresh = BearerTokenAuthenticator::refresh(directory.clone(), directory.clone());

        assert_eq!(access.authenticate(&bearer(&bundle.access)).await?.id, alice.id);
        assert!(matches!(
            access.authenticate(&bearer(&bundle.refresh)).await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));

        clock.advance_seconds(31);
        assert!(matches!(
            access.authenticate(&bearer(&bundle.access)).await,
            Err(AuthnError::Failure(AuthFailure::CredentialExpired))
        ));
        assert_eq!(refresh.authenticate(&bearer(&bundle.refresh)).await?.id, alice.id);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_subject_fails_after_valid_token() -> Result<()> {
        let directory = Arc::new(MemoryDirectory::new(Arc::new(ManualClock::default())));
        let mut mallory = identity("mallory@example.com");
        mallory.enabled = false;
        directory.insert_identity(mallory.clone(), None).await?;
        let bundle = directory.issue(&mallory).await?;

        let access = BearerTokenAuthenticator::access(directory.clone(), directory.clone());
        assert!(matches!(
            access.authenticate(&bearer(&bundle.access)).await,
            Err(AuthnError::Failure(AuthFailure::SubjectDisabled))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn other_credential_variants_are_invalid() {
        let directory = Arc::new(MemoryDirectory::new(Arc::new(ManualClock::default())));
        let access = BearerTokenAuthenticator::access(directory.clone(), directory);
        let credential = Credential::Email {
            email: "alice@example.com".to_string(),
        };
        assert!(matches!(
            access.authenticate(&credential).await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));
    }
}
