use async_trait::async_trait;
use std::sync::Arc;

use super::{check_subject, AuthFailure, Authenticator, AuthnError};
use crate::{
    identity::{AuthenticatedIdentity, Credential},
    store::IdentityStore,
};

/// Resolves a subject from its email alone. Used to pick the recipient of a
/// challenge, never to grant access.
pub struct EmailAuthenticator {
    identities: Arc<dyn IdentityStore>,
    allow_unverified: bool,
}

impl EmailAuthenticator {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            identities,
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
impl Authenticator for EmailAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError> {
        let Credential::Email { email } = credential else {
            return Err(AuthFailure::CredentialInvalid.into());
        };
        let identity = self.identities.find_by_email(email).await?;
        Ok(check_subject(identity, self.allow_unverified)?)
    }
}
