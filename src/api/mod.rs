//! HTTP surface.
//!
//! Routes are grouped by [`gate::EndpointPolicy`]; every group carries its
//! own gate middleware so the admission pipeline runs before any handler.
//! Shared layers (request id, tracing span, state extension) wrap the merged
//! router.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::Json,
    routing::{delete, get, post},
    Extension, Router,
};
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod gate;
pub mod handlers;
mod openapi;
pub mod state;
mod sweeper;

pub use openapi::openapi;
pub use sweeper::spawn_challenge_sweeper;

use self::{
    gate::EndpointPolicy,
    handlers::{admin, auth, health, me, tenants},
    state::AppState,
};

const REQUEST_ID: &str = "x-request-id";

/// Build the full application router for `state`.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(|| async { Json(openapi()) }));

    let auth = Router::new()
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/tfa/verify", post(auth::tfa_verify))
        .route("/v1/auth/otp", post(auth::otp_request))
        .route("/v1/auth/otp/verify", post(auth::otp_verify))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/password/request", post(auth::password_request))
        .route("/v1/auth/password/reset", post(auth::password_reset))
        .route("/v1/auth/verification/request", post(auth::verification_request))
        .route("/v1/auth/verification/confirm", post(auth::verification_confirm));

    let private = Router::new()
        .route("/v1/me", get(me::me))
        .route("/v1/tenants/{tenant_id}/authorize", post(tenants::authorize));

    let admin = Router::new().route(
        "/v1/admin/subjects/{subject_id}/challenges",
        delete(admin::revoke_challenges),
    );

    Router::new()
        .merge(gated(public, &state, EndpointPolicy::PUBLIC))
        .merge(gated(auth, &state, EndpointPolicy::AUTH))
        .merge(gated(private, &state, EndpointPolicy::PRIVATE))
        .merge(gated(admin, &state, EndpointPolicy::ADMIN))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

fn gated(routes: Router, state: &AppState, policy: EndpointPolicy) -> Router {
    routes.route_layer(middleware::from_fn_with_state(
        (state.clone(), policy),
        gate::enforce,
    ))
}

/// Serve the router on `[::]:port` until ctrl-c.
///
/// A positive `sweep_interval` starts the expired-challenge sweeper.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, state: AppState, sweep_interval: Option<Duration>) -> Result<()> {
    let sweeper =
        sweep_interval.map(|interval| spawn_challenge_sweeper(state.challenges().clone(), interval));

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
