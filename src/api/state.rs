//! Shared request state.
//!
//! Built once at startup from the immutable config and the collaborator set,
//! then cloned into every handler via `Extension` and into the gate middleware.

use std::sync::Arc;

use super::gate::RequestGate;
use crate::{
    authn::{ApiKeyAuthenticator, BearerTokenAuthenticator, CredentialAuthenticator},
    authz::AuthorizationGuard,
    clock::Clock,
    config::GateConfig,
    events::GateObserver,
    flows::AuthFlows,
    otp::OtpChallengeManager,
    rate_limit::RateLimiter,
    store::{
        memory::{MemoryBucketStore, MemoryChallengeStore, MemoryDirectory},
        BucketStore, ChallengeStore, CredentialVerifier, IdentityStore, PermissionStore,
        TokenIssuer,
    },
};

/// External collaborators the gate talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub permissions: Arc<dyn PermissionStore>,
    pub buckets: Arc<dyn BucketStore>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn GateObserver>,
}

impl Collaborators {
    /// Everything in process: the directory plays identity service, verifier,
    /// token issuer and permission store.
    pub fn in_memory(
        directory: Arc<MemoryDirectory>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn GateObserver>,
    ) -> Self {
        Self {
            identities: directory.clone(),
            verifier: directory.clone(),
            tokens: directory.clone(),
            permissions: directory,
            buckets: Arc::new(MemoryBucketStore::new()),
            challenges: Arc::new(MemoryChallengeStore::new()),
            clock,
            observer,
        }
    }

    #[must_use]
    pub fn with_buckets(mut self, buckets: Arc<dyn BucketStore>) -> Self {
        self.buckets = buckets;
        self
    }

    #[must_use]
    pub fn with_challenges(mut self, challenges: Arc<dyn ChallengeStore>) -> Self {
        self.challenges = challenges;
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<GateConfig>,
    gate: Arc<RequestGate>,
    flows: Arc<AuthFlows>,
    guard: Arc<AuthorizationGuard>,
    challenges: Arc<OtpChallengeManager>,
}

impl AppState {
    pub fn new(config: Arc<GateConfig>, collaborators: Collaborators) -> Self {
        let Collaborators {
            identities,
            verifier,
            tokens,
            permissions,
            buckets,
            challenges,
            clock,
            observer,
        } = collaborators;

        let challenges = Arc::new(OtpChallengeManager::new(
            challenges,
            verifier.clone(),
            clock.clone(),
            observer.clone(),
        ));
        let guard = Arc::new(AuthorizationGuard::new(permissions));

        let authenticator = CredentialAuthenticator::new(
            config
                .identity_token()
                .then(|| BearerTokenAuthenticator::access(identities.clone(), verifier.clone())),
            config
                .identity_key()
                .then(|| ApiKeyAuthenticator::new(identities.clone(), clock.clone())),
            observer.clone(),
        );
        let gate = Arc::new(RequestGate::new(
            config.clone(),
            RateLimiter::new(buckets, clock),
            authenticator,
            guard.clone(),
        ));
        let flows = Arc::new(AuthFlows::new(
            config.clone(),
            identities,
            verifier,
            tokens,
            challenges.clone(),
            observer,
        ));

        Self {
            config,
            gate,
            flows,
            guard,
            challenges,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    #[must_use]
    pub fn flows(&self) -> &AuthFlows {
        &self.flows
    }

    #[must_use]
    pub fn guard(&self) -> &AuthorizationGuard {
        &self.guard
    }

    #[must_use]
    pub fn challenges(&self) -> &Arc<OtpChallengeManager> {
        &self.challenges
    }
}
