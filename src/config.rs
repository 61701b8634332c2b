//! Immutable gate configuration.
//!
//! Built once at startup from CLI/env arguments and shared as
//! `Arc<GateConfig>`. Each section mirrors one dotted key family
//! (`rate_limit.*`, `identity.*`, `auth.*`, `user.*`, `request.*`).

use crate::{otp::OtpAlphabet, rate_limit::RateLimitClass};
use std::net::IpAddr;

const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_AUTH_RATE_LIMIT: u32 = 10;
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 60 * 60;

/// Challenge policy for one OTP purpose (`auth.password.tfa`, `auth.otp`,
/// `user.password_request`, `user.verification`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpSettings {
    pub enabled: bool,
    /// Minimum seconds before a challenge may be re-issued.
    pub wait_seconds: i64,
    /// Seconds a challenge stays valid.
    pub duration_seconds: i64,
    pub length: usize,
    pub alphabet: OtpAlphabet,
}

impl OtpSettings {
    #[must_use]
    pub const fn new(wait_seconds: i64, duration_seconds: i64, length: usize, alphabet: OtpAlphabet) -> Self {
        Self {
            enabled: false,
            wait_seconds,
            duration_seconds,
            length,
            alphabet,
        }
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub public: u32,
    pub auth: u32,
    pub private: u32,
}

impl RateLimitConfig {
    /// Drops per minute for a class; `0` disables the step.
    #[must_use]
    pub const fn limit_for(&self, class: RateLimitClass) -> u32 {
        match class {
            RateLimitClass::Public => self.public,
            RateLimitClass::Auth => self.auth,
            RateLimitClass::Private => self.private,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestConfig {
    pub headers: Vec<(String, String)>,
    pub https_env: Vec<String>,
    pub ip_whitelist: Vec<IpAddr>,
    /// Socket peers allowed to name the client through forwarding headers.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    debug: bool,
    environment: String,
    token_ttl_seconds: i64,
    rate_limit: RateLimitConfig,
    identity_token: bool,
    identity_key: bool,
    password_enabled: bool,
    tfa: OtpSettings,
    otp: OtpSettings,
    refresh_enabled: bool,
    password_request: OtpSettings,
    verification: OtpSettings,
    request: RequestConfig,
    response_headers: Vec<(String, String)>,
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            debug: false,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            rate_limit: RateLimitConfig {
                public: 0,
                auth: DEFAULT_AUTH_RATE_LIMIT,
                private: 0,
            },
            identity_token: true,
            identity_key: false,
            password_enabled: true,
            tfa: OtpSettings::new(60, 300, 6, OtpAlphabet::Numeric),
            otp: OtpSettings::new(60, 600, 6, OtpAlphabet::Numeric),
            refresh_enabled: true,
            password_request: OtpSettings::new(60, 900, 8, OtpAlphabet::Alphanumeric),
            verification: OtpSettings::new(60, 86_400, 8, OtpAlphabet::Alphanumeric),
            request: RequestConfig::default(),
            response_headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: String) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, token: bool, key: bool) -> Self {
        self.identity_token = token;
        self.identity_key = key;
        self
    }

    #[must_use]
    pub fn with_password_enabled(mut self, enabled: bool) -> Self {
        self.password_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_tfa(mut self, tfa: OtpSettings) -> Self {
        self.tfa = tfa;
        self
    }

    #[must_use]
    pub fn with_otp(mut self, otp: OtpSettings) -> Self {
        self.otp = otp;
        self
    }

    #[must_use]
    pub fn with_refresh_enabled(mut self, enabled: bool) -> Self {
        self.refresh_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_password_request(mut self, settings: OtpSettings) -> Self {
        self.password_request = settings;
        self
    }

    #[must_use]
    pub fn with_verification(mut self, settings: OtpSettings) -> Self {
        self.verification = settings;
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestConfig) -> Self {
        self.request = request;
        self
    }

    #[must_use]
    pub fn with_response_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.response_headers = headers;
        self
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    #[must_use]
    pub fn identity_token(&self) -> bool {
        self.identity_token
    }

    #[must_use]
    pub fn identity_key(&self) -> bool {
        self.identity_key
    }

    #[must_use]
    pub fn password_enabled(&self) -> bool {
        self.password_enabled
    }

    #[must_use]
    pub fn tfa(&self) -> &OtpSettings {
        &self.tfa
    }

    #[must_use]
    pub fn otp(&self) -> &OtpSettings {
        &self.otp
    }

    #[must_use]
    pub fn refresh_enabled(&self) -> bool {
        self.refresh_enabled
    }

    #[must_use]
    pub fn password_request(&self) -> &OtpSettings {
        &self.password_request
    }

    #[must_use]
    pub fn verification(&self) -> &OtpSettings {
        &self.verification
    }

    #[must_use]
    pub fn request(&self) -> &RequestConfig {
        &self.request
    }

    #[must_use]
    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    /// Whether the current environment must be served over TLS.
    #[must_use]
    pub fn requires_https(&self) -> bool {
        self.request
            .https_env
            .iter()
            .any(|env| env.eq_ignore_ascii_case(&self.environment))
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `key=value,key=value` pairs. Entries without `=` or with an empty
/// key are skipped.
#[must_use]
pub fn parse_header_pairs(input: &str) -> Vec<(String, String)> {
    input
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.trim().to_string();
            let value = parts.next()?.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some((key, value))
            }
        })
        .collect()
}

/// Split a comma separated list, dropping empty entries.
#[must_use]
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
