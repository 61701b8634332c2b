use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::debug;

use super::{check_subject, AuthFailure, Authenticator, AuthnError};
use crate::{
    clock::Clock,
    identity::{ApiKeyRecord, AuthenticatedIdentity, Credential},
    store::IdentityStore,
};

pub struct ApiKeyAuthenticator {
    identities: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl ApiKeyAuthenticator {
    pub fn new(identities: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { identities, clock }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<AuthenticatedIdentity, AuthnError> {
        let Credential::ApiKey {
            key,
            origin_ip,
            referer,
        } = credential
        else {
            return Err(AuthFailure::CredentialInvalid.into());
        };

        let record = self
            .identities
            .find_api_key(key.expose_secret())
            .await?
            .ok_or(AuthFailure::CredentialInvalid)?;

        if record
            .expires_at
            .is_some_and(|expires_at| self.clock.now() >= expires_at)
        {
            return Err(AuthFailure::CredentialExpired.into());
        }

        if !ip_allowed(&record, *origin_ip) || !referer_allowed(&record, referer.as_deref()) {
            debug!(identity_id = %record.identity_id, "api key used from a disallowed origin");
            return Err(AuthFailure::OriginNotAllowed.into());
        }

        let identity = self.identities.find_by_id(record.identity_id).await?;
        Ok(check_subject(identity, false)?)
    }
}

fn ip_allowed(record: &ApiKeyRecord, origin_ip: Option<std::net::IpAddr>) -> bool {
    record.allowed_ips.is_empty()
        || origin_ip.is_some_and(|ip| record.allowed_ips.contains(&ip))
}

/// Match the referer host against the allowlist; subdomains of an allowed
/// domain match too.
fn referer_allowed(record: &ApiKeyRecord, referer: Option<&str>) -> bool {
    if record.allowed_domains.is_empty() {
        return true;
    }
    let Some(host) = referer
        .and_then(|referer| url::Url::parse(referer).ok())
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    record.allowed_domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{authn::tests::identity, clock::ManualClock, store::memory::MemoryDirectory};
    use anyhow::Result;
    use chrono::Duration;
    use secrecy::SecretString;
    use std::net::IpAddr;

    fn api_key(key: &str, origin_ip: Option<IpAddr>, referer: Option<&str>) -> Credential {
        Credential::ApiKey {
            key: SecretString::from(key.to_string()),
            origin_ip,
            referer: referer.map(str::to_string),
        }
    }

    fn record(allowed_ips: Vec<IpAddr>, allowed_domains: Vec<&str>) -> ApiKeyRecord {
        ApiKeyRecord {
            allowed_ips,
            allowed_domains: allowed_domains.into_iter().map(str::to_string).collect(),
            ..ApiKeyRecord::default()
        }
    }

    #[test]
    fn referer_matching() {
        let rec = record(Vec::new(), vec!["example.com"]);
        assert!(referer_allowed(&rec, Some("https://example.com/page")));
        assert!(referer_allowed(&rec, Some("https://app.EXAMPLE.com")));
        assert!(!referer_allowed(&rec, Some("https://notexample.com")));
        assert!(!referer_allowed(&rec, Some("not a url")));
        assert!(!referer_allowed(&rec, None));
        assert!(referer_allowed(&record(Vec::new(), Vec::new()), None));
    }

    #[test]
    fn ip_matching() {
        let allowed: IpAddr = [192, 168, 1, 10].into();
        let other: IpAddr = [192, 168, 1, 11].into();
        let rec = record(vec![allowed], Vec::new());
        assert!(ip_allowed(&rec, Some(allowed)));
        assert!(!ip_allowed(&rec, Some(other)));
        assert!(!ip_allowed(&rec, None));
        assert!(ip_allowed(&record(Vec::new(), Vec::new()), None));
    }

    #[tokio::test]
    async fn key_lifecycle() -> Result<()> {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()));
        let service = identity("service@example.com");
        directory.insert_identity(service.clone(), None).await?;
        let allowed: IpAddr = [10, 0, 0, 5].into();
        directory
            .insert_api_key(
                "svc-key",
                ApiKeyRecord {
                    identity_id: service.id,
                    expires_at: Some(clock.now() + Duration::hours(1)),
                    allowed_ips: vec![allowed],
                    allowed_domains: Vec::new(),
                },
            )
            .await;

        let authenticator = ApiKeyAuthenticator::new(directory.clone(), clock.clone());

        let resolved = authenticator
            .authenticate(&api_key("svc-key", Some(allowed), None))
            .await?;
        assert_eq!(resolved.id, service.id);

        assert!(matches!(
            authenticator
                .authenticate(&api_key("svc-key", Some([10, 0, 0, 6].into()), None))
                .await,
            Err(AuthnError::Failure(AuthFailure::OriginNotAllowed))
        ));
        assert!(matches!(
            authenticator
                .authenticate(&api_key("other-key", Some(allowed), None))
                .await,
            Err(AuthnError::Failure(AuthFailure::CredentialInvalid))
        ));

        clock.advance_seconds(3600);
        assert!(matches!(
            authenticator
                .authenticate(&api_key("svc-key", Some(allowed), None))
                .await,
            Err(AuthnError::Failure(AuthFailure::CredentialExpired))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn orphaned_key_reports_missing_subject() {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()));
        directory
            .insert_api_key("orphan", ApiKeyRecord::default())
            .await;
        let authenticator = ApiKeyAuthenticator::new(directory, clock);
        assert!(matches!(
            authenticator.authenticate(&api_key("orphan", None, None)).await,
            Err(AuthnError::Failure(AuthFailure::SubjectNotFound))
        ));
    }
}
