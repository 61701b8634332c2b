use anyhow::Result;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use std::{
    collections::BTreeSet,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
};
use tollgate::{
    api::{
        router,
        state::{AppState, Collaborators},
    },
    clock::{Clock, ManualClock},
    config::{GateConfig, OtpSettings, RateLimitConfig, RequestConfig},
    events::GateObserver,
    identity::{ApiKeyRecord, AuthenticatedIdentity, TokenBundle},
    otp::{IssuedChallenge, OtpAlphabet},
    store::memory::MemoryDirectory,
};
use tower::ServiceExt;
use uuid::Uuid;

const PASSWORD: &str = "correct horse battery";

#[derive(Default)]
struct CodeCapture {
    codes: Mutex<Vec<String>>,
}

impl CodeCapture {
    fn last(&self) -> Option<String> {
        self.codes
            .lock()
            .ok()
            .and_then(|codes| codes.last().cloned())
    }
}

impl GateObserver for CodeCapture {
    fn on_challenge_issued(&self, issued: &IssuedChallenge) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.push(issued.code.clone());
        }
    }
}

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    directory: Arc<MemoryDirectory>,
    codes: Arc<CodeCapture>,
}

impl Harness {
    fn new(config: GateConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(MemoryDirectory::new(clock.clone()));
        let codes = Arc::new(CodeCapture::default());
        let state = AppState::new(
            Arc::new(config),
            Collaborators::in_memory(directory.clone(), clock.clone(), codes.clone()),
        );
        Self {
            app: router(state),
            clock,
            directory,
            codes,
        }
    }

    async fn user(&self, email: &str, admin: bool) -> Result<AuthenticatedIdentity> {
        let identity = AuthenticatedIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            admin,
            verified: true,
            enabled: true,
            tenants: BTreeSet::new(),
        };
        self.directory
            .insert_identity(identity.clone(), Some(PASSWORD))
            .await?;
        Ok(identity)
    }

    /// GET `uri` over a connection from `peer` with extra headers.
    async fn get_from(
        &self,
        uri: &str,
        peer: IpAddr,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty())?;
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(peer, 41_000)));
        Ok(self.app.clone().oneshot(request).await?)
    }

    async fn post(&self, uri: &str, body: Value) -> Result<Response> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?;
        Ok(self.app.clone().oneshot(request).await?)
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<Response> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };
        Ok(self.app.clone().oneshot(request).await?)
    }

    async fn login(&self, email: &str) -> Result<TokenBundle> {
        let response = self
            .post(
                "/v1/auth/login",
                json!({ "email": email, "password": PASSWORD }),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        Ok(serde_json::from_slice(&body_bytes(response).await?)?)
    }
}

async fn body_bytes(response: Response) -> Result<Vec<u8>> {
    Ok(axum::body::to_bytes(response.into_body(), usize::MAX)
        .await?
        .to_vec())
}

async fn error_status(response: Response) -> Result<u64> {
    let body: Value = serde_json::from_slice(&body_bytes(response).await?)?;
    Ok(body["error"]["status"].as_u64().unwrap_or_default())
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn health_carries_request_id_and_default_headers() -> Result<()> {
    let harness = Harness::new(
        GateConfig::new().with_response_headers(vec![(
            "x-frame-options".to_string(),
            "DENY".to_string(),
        )]),
    );

    let response = harness.send(Method::GET, "/health", None, None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "x-request-id").is_some());
    assert_eq!(header_str(&response, "x-frame-options"), Some("DENY"));
    Ok(())
}

#[tokio::test]
async fn login_then_me_with_bearer() -> Result<()> {
    let harness = Harness::new(GateConfig::new());
    let alice = harness.user("alice@example.com", false).await?;

    let bundle = harness.login("Alice@Example.com").await?;
    assert!(!bundle.access.is_empty());
    assert_ne!(bundle.access, bundle.refresh);

    let response = harness
        .send(Method::GET, "/v1/me", Some(&bundle.access), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(me["email"], "alice@example.com");
    assert_eq!(me["id"], alice.id.to_string());
    Ok(())
}

#[tokio::test]
async fn private_endpoint_without_credentials_is_forbidden() -> Result<()> {
    let harness = Harness::new(GateConfig::new());

    let response = harness.send(Method::GET, "/v1/me", None, None).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_status(response).await?, 403);

    let response = harness
        .send(Method::GET, "/v1/me", Some("not-a-token"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let harness = Harness::new(GateConfig::new());
    harness.user("alice@example.com", false).await?;

    let response = harness
        .post(
            "/v1/auth/login",
            json!({ "email": "alice@example.com", "password": "wrong password!" }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn auth_endpoints_require_json() -> Result<()> {
    let harness = Harness::new(GateConfig::new());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/auth/login")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("email=alice"))?;
    let response = harness.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn two_factor_login_is_single_use() -> Result<()> {
    let harness = Harness::new(
        GateConfig::new()
            .with_tfa(OtpSettings::new(60, 300, 6, OtpAlphabet::Numeric).enabled(true)),
    );
    harness.user("alice@example.com", false).await?;

    let response = harness
        .post(
            "/v1/auth/login",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let code = harness.codes.last().unwrap_or_default();
    assert_eq!(code.len(), 6);

    // A second login inside the wait window is refused.
    let response = harness
        .post(
            "/v1/auth/login",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let verify = json!({ "email": "alice@example.com", "token": code });
    let response = harness.post("/v1/auth/tfa/verify", verify.clone()).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = harness.post("/v1/auth/tfa/verify", verify).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn auth_class_is_rate_limited() -> Result<()> {
    let harness = Harness::new(GateConfig::new().with_rate_limit(RateLimitConfig {
        public: 0,
        auth: 2,
        private: 0,
    }));
    let body = json!({ "email": "nobody@example.com", "password": PASSWORD });

    for _ in 0..2 {
        let response = harness.post("/v1/auth/login", body.clone()).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("2"));
    }

    let response = harness.post("/v1/auth/login", body).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), Some("30"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("0"));
    Ok(())
}

#[tokio::test]
async fn disabled_flows_are_not_found() -> Result<()> {
    let harness = Harness::new(GateConfig::new().with_refresh_enabled(false));

    let response = harness
        .post("/v1/auth/otp", json!({ "email": "alice@example.com" }))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = harness
        .post("/v1/auth/refresh", json!({ "refresh_token": "anything" }))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn otp_request_is_silent_for_unknown_subjects() -> Result<()> {
    let harness = Harness::new(
        GateConfig::new().with_otp(OtpSettings::new(60, 600, 6, OtpAlphabet::Numeric).enabled(true)),
    );

    let response = harness
        .post("/v1/auth/otp", json!({ "email": "ghost@example.com" }))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(harness.codes.last().is_none());
    Ok(())
}

#[tokio::test]
async fn tenant_authorization() -> Result<()> {
    let harness = Harness::new(GateConfig::new());
    let alice = harness.user("alice@example.com", false).await?;
    let tenant = Uuid::new_v4();
    harness.directory.grant(tenant, alice.id, "invoices.read").await;
    let bundle = harness.login("alice@example.com").await?;
    let uri = format!("/v1/tenants/{tenant}/authorize");

    let response = harness
        .send(
            Method::POST,
            &uri,
            Some(&bundle.access),
            Some(json!({ "permissions": ["invoices.read"] })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .send(
            Method::POST,
            &uri,
            Some(&bundle.access),
            Some(json!({ "permissions": ["invoices.read", "invoices.write"] })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_admin() -> Result<()> {
    let harness = Harness::new(GateConfig::new());
    let alice = harness.user("alice@example.com", false).await?;
    harness.user("root@example.com", true).await?;
    let uri = format!("/v1/admin/subjects/{}/challenges", alice.id);

    let member = harness.login("alice@example.com").await?;
    let response = harness
        .send(Method::DELETE, &uri, Some(&member.access), None)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = harness.login("root@example.com").await?;
    let response = harness
        .send(Method::DELETE, &uri, Some(&admin.access), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_public() -> Result<()> {
    let harness = Harness::new(GateConfig::new());

    let response = harness
        .send(Method::GET, "/openapi.json", None, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert!(doc["paths"]["/v1/auth/login"].is_object());
    Ok(())
}

#[tokio::test]
async fn api_key_identification_checks_expiry_and_origin() -> Result<()> {
    let harness = Harness::new(GateConfig::new().with_identity(true, true));
    let service = harness.user("service@example.com", false).await?;
    let office = IpAddr::from([198, 51, 100, 4]);
    harness
        .directory
        .insert_api_key(
            "tg_live_office",
            ApiKeyRecord {
                identity_id: service.id,
                expires_at: None,
                allowed_ips: vec![office],
                allowed_domains: vec!["example.com".to_string()],
            },
        )
        .await;
    harness
        .directory
        .insert_api_key(
            "tg_live_short",
            ApiKeyRecord {
                identity_id: service.id,
                expires_at: Some(harness.clock.now() + Duration::seconds(60)),
                allowed_ips: Vec::new(),
                allowed_domains: Vec::new(),
            },
        )
        .await;

    let referer = ("referer", "https://app.example.com/dashboard");
    let response = harness
        .get_from("/v1/me", office, &[("x-api-key", "tg_live_office"), referer])
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(me["id"], service.id.to_string());

    let response = harness
        .get_from(
            "/v1/me",
            office,
            &[("x-api-key", "tg_live_office"), ("referer", "https://evil.test/")],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .get_from(
            "/v1/me",
            IpAddr::from([203, 0, 113, 9]),
            &[("x-api-key", "tg_live_office"), referer],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .get_from("/v1/me", office, &[("x-api-key", "tg_live_short")])
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    harness.clock.advance_seconds(61);
    let response = harness
        .get_from("/v1/me", office, &[("x-api-key", "tg_live_short")])
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn forwarded_for_is_only_believed_from_trusted_proxies() -> Result<()> {
    let proxy = IpAddr::from([10, 0, 0, 1]);
    let harness = Harness::new(GateConfig::new().with_request(RequestConfig {
        ip_whitelist: vec![IpAddr::from([10, 0, 0, 9])],
        trusted_proxies: vec![proxy],
        ..RequestConfig::default()
    }));
    let stranger = IpAddr::from([203, 0, 113, 5]);

    let response = harness.get_from("/health", stranger, &[]).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .get_from("/health", stranger, &[("x-forwarded-for", "10.0.0.9")])
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .get_from("/health", proxy, &[("x-forwarded-for", "10.0.0.9")])
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn private_class_limits_unidentified_callers() -> Result<()> {
    let harness = Harness::new(GateConfig::new().with_rate_limit(RateLimitConfig {
        public: 0,
        auth: 0,
        private: 2,
    }));
    let peer = IpAddr::from([203, 0, 113, 7]);

    let mut statuses = Vec::new();
    for attempt in 0..10 {
        let bearer = format!("Bearer garbage-{attempt}");
        let response = harness
            .get_from("/v1/me", peer, &[("authorization", bearer.as_str())])
            .await?;
        statuses.push(response.status());
    }
    assert_eq!(statuses[..2], [StatusCode::FORBIDDEN, StatusCode::FORBIDDEN]);
    assert!(statuses[2..]
        .iter()
        .all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
    Ok(())
}
