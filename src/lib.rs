//! # Tollgate (request gatekeeping)
//!
//! `tollgate` decides, for every inbound request to a multi-tenant resource
//! API, whether it may proceed and on whose behalf.
//!
//! ## Pipeline
//!
//! Each endpoint declares an [`api::gate::EndpointPolicy`]. The gate checks
//! required headers, transport security and the client IP allowlist, then
//! charges a leaky bucket for the endpoint's class (public, auth, private).
//! Private endpoints additionally identify the caller through a bearer token
//! or an API key, and admin endpoints require the admin flag.
//!
//! ## Authentication flows
//!
//! Password login (optionally followed by a second factor), passwordless OTP
//! sign-in, token refresh, password reset and email verification all go
//! through [`flows::AuthFlows`]. One-time codes live in
//! [`otp::OtpChallengeManager`], keyed by subject and purpose.
//!
//! ## Authorization
//!
//! [`authz::AuthorizationGuard`] answers "does this identity hold every one of
//! these permissions in this tenant". Admins bypass the check.
//!
//! Identification failures are reported uniformly as `403 Forbidden` so that
//! callers cannot tell a missing subject from a bad secret.

pub mod api;
pub mod authn;
pub mod authz;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod flows;
pub mod identity;
pub mod otp;
pub mod rate_limit;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
