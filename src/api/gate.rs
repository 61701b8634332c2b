//! Request admission pipeline.
//!
//! Flow Overview:
//! 1) Required headers (and JSON content type on auth endpoints).
//! 2) Encrypted transport in the configured environments.
//! 3) Client IP allowlist.
//! 4) Rate limit for the endpoint's class.
//! 5) Identification on private endpoints.
//! 6) Admin requirement.
//!
//! Steps run in this order and the first failure ends the pipeline. Rate-limit
//! headers from step 4 travel with both admissions and rejections so the
//! middleware can attach them to whatever response goes out.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::CONTENT_TYPE,
        HeaderMap, HeaderName, HeaderValue, Uri,
    },
    middleware::Next,
    response::Response,
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::{debug, error};

use super::state::AppState;
use crate::{
    authn::{CredentialAuthenticator, PresentedCredentials},
    authz::AuthorizationGuard,
    config::GateConfig,
    error::GateError,
    identity::AuthenticatedIdentity,
    rate_limit::{fingerprint, RateLimitClass, RateLimitOutcome, RateLimiter},
};

const UNKNOWN_CALLER: &str = "unknown";

/// Capabilities an endpoint declares; the pipeline is composed from them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointPolicy {
    pub class: RateLimitClass,
    pub admin: bool,
}

impl EndpointPolicy {
    pub const PUBLIC: Self = Self {
        class: RateLimitClass::Public,
        admin: false,
    };
    pub const AUTH: Self = Self {
        class: RateLimitClass::Auth,
        admin: false,
    };
    pub const PRIVATE: Self = Self {
        class: RateLimitClass::Private,
        admin: false,
    };
    pub const ADMIN: Self = Self {
        class: RateLimitClass::Private,
        admin: true,
    };
}

/// The parts of an inbound request the gate inspects.
#[derive(Debug)]
pub struct GateRequest<'a> {
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    /// Socket peer of the connection.
    pub peer: Option<IpAddr>,
}

impl GateRequest<'_> {
    /// Client IP. Forwarding headers are read only when the socket peer is
    /// one of `trusted_proxies`; any other peer is itself the client.
    #[must_use]
    pub fn client_ip(&self, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
        if self.via_trusted_proxy(trusted_proxies) {
            forwarded_ip(self.headers, trusted_proxies).or(self.peer)
        } else {
            self.peer
        }
    }

    fn via_trusted_proxy(&self, trusted_proxies: &[IpAddr]) -> bool {
        self.peer.is_some_and(|peer| trusted_proxies.contains(&peer))
    }

    fn is_secure(&self, trusted_proxies: &[IpAddr]) -> bool {
        if self.uri.scheme_str() == Some("https") {
            return true;
        }
        self.via_trusted_proxy(trusted_proxies)
            && self
                .headers
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
    }
}

#[derive(Debug, Default)]
pub struct Admission {
    pub identity: Option<AuthenticatedIdentity>,
    pub rate_limit: Option<RateLimitOutcome>,
}

#[derive(Debug)]
pub struct Rejection {
    pub error: GateError,
    pub rate_limit: Option<RateLimitOutcome>,
}

impl From<GateError> for Rejection {
    fn from(error: GateError) -> Self {
        Self {
            error,
            rate_limit: None,
        }
    }
}

pub struct RequestGate {
    config: Arc<GateConfig>,
    limiter: RateLimiter,
    authenticator: CredentialAuthenticator,
    guard: Arc<AuthorizationGuard>,
}

impl RequestGate {
    pub fn new(
        config: Arc<GateConfig>,
        limiter: RateLimiter,
        authenticator: CredentialAuthenticator,
        guard: Arc<AuthorizationGuard>,
    ) -> Self {
        Self {
            config,
            limiter,
            authenticator,
            guard,
        }
    }

    /// Run the admission pipeline for one request.
    ///
    /// Every class charges a bucket keyed on the client IP. Private endpoints
    /// charge a second bucket keyed on the identified subject, so failed
    /// identifications still count against the IP and one subject shares a
    /// single allowance across all of its credentials.
    ///
    /// # Errors
    /// The first failing step's error, with any rate-limit outcome computed
    /// before it.
    pub async fn admit(
        &self,
        request: &GateRequest<'_>,
        policy: EndpointPolicy,
    ) -> Result<Admission, Rejection> {
        self.check_headers(request.headers, policy)?;

        let trusted_proxies = &self.config.request().trusted_proxies;
        if self.config.requires_https() && !request.is_secure(trusted_proxies) {
            return Err(GateError::InsecureTransport.into());
        }

        let client_ip = request.client_ip(trusted_proxies);
        let allowlist = &self.config.request().ip_whitelist;
        if !allowlist.is_empty() && !client_ip.is_some_and(|ip| allowlist.contains(&ip)) {
            debug!(client_ip = ?client_ip, "client ip not in allowlist");
            return Err(GateError::Forbidden.into());
        }

        let limit = self.config.rate_limit().limit_for(policy.class);
        let rate_limit = if limit > 0 {
            let caller = client_ip.map_or_else(|| UNKNOWN_CALLER.to_string(), |ip| ip.to_string());
            Some(self.charge(policy.class, &caller, limit, None).await?)
        } else {
            None
        };

        if policy.class != RateLimitClass::Private {
            return Ok(Admission {
                identity: None,
                rate_limit,
            });
        }

        let presented = PresentedCredentials::from_headers(request.headers, client_ip);
        let identity = self
            .authenticator
            .identify(&presented)
            .await
            .map_err(|error| Rejection { error, rate_limit })?;

        let rate_limit = if limit > 0 {
            Some(
                self.charge(policy.class, &subject_caller(&identity), limit, rate_limit)
                    .await?,
            )
        } else {
            rate_limit
        };

        if policy.admin {
            self.guard
                .require_admin(&identity)
                .map_err(|error| Rejection { error, rate_limit })?;
        }

        Ok(Admission {
            identity: Some(identity),
            rate_limit,
        })
    }

    /// Charge one drop to `caller`'s bucket. `previous` is reported if the
    /// store fails.
    async fn charge(
        &self,
        class: RateLimitClass,
        caller: &str,
        limit: u32,
        previous: Option<RateLimitOutcome>,
    ) -> Result<RateLimitOutcome, Rejection> {
        let outcome = self
            .limiter
            .enforce(&fingerprint(class, caller), limit)
            .await
            .map_err(|err| Rejection {
                error: GateError::Unexpected(err),
                rate_limit: previous,
            })?;
        if !outcome.allowed {
            return Err(Rejection {
                error: GateError::RateLimited {
                    retry_after_seconds: outcome.retry_after_whole(),
                },
                rate_limit: Some(outcome),
            });
        }
        Ok(outcome)
    }

    fn check_headers(&self, headers: &HeaderMap, policy: EndpointPolicy) -> Result<(), GateError> {
        for (name, expected) in &self.config.request().headers {
            let matches = headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value == expected);
            if !matches {
                return Err(GateError::Validation(format!(
                    "missing or invalid header: {name}"
                )));
            }
        }

        if policy.class == RateLimitClass::Auth {
            let is_json = headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(';').next())
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
            if !is_json {
                return Err(GateError::Validation(
                    "content type must be application/json".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn subject_caller(identity: &AuthenticatedIdentity) -> String {
    format!("subject:{}", identity.id)
}

/// Rightmost `X-Forwarded-For` hop that is not itself a trusted proxy, then
/// `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter_map(|value| value.parse::<IpAddr>().ok())
        .collect::<Vec<_>>();
    if let Some(ip) = forwarded
        .iter()
        .rev()
        .find(|ip| !trusted_proxies.contains(*ip))
    {
        return Some(*ip);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .and_then(|value| value.parse().ok())
}

/// Gate middleware for one route group.
pub async fn enforce(
    State((state, policy)): State<(AppState, EndpointPolicy)>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let outcome = state
        .gate()
        .admit(
            &GateRequest {
                headers: request.headers(),
                uri: request.uri(),
                peer,
            },
            policy,
        )
        .await;

    let (mut response, rate_limit) = match outcome {
        Ok(admission) => {
            if let Some(identity) = admission.identity {
                request.extensions_mut().insert(identity);
            }
            (next.run(request).await, admission.rate_limit)
        }
        Err(rejection) => {
            debug!(status = rejection.error.status().as_u16(), "request rejected by gate");
            (
                rejection.error.into_response_with(state.config().debug()),
                rejection.rate_limit,
            )
        }
    };

    if let Some(outcome) = rate_limit {
        outcome.apply_headers(response.headers_mut());
    }
    apply_default_headers(response.headers_mut(), state.config().response_headers());
    response
}

fn apply_default_headers(headers: &mut HeaderMap, defaults: &[(String, String)]) {
    for (name, value) in defaults {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => error!(header = %name, "skipping invalid default response header"),
        }
    }
}
