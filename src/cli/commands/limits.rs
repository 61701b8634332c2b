use super::switch;
use crate::config::RateLimitConfig;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_RATE_LIMIT_PUBLIC: &str = "rate-limit-public";
pub const ARG_RATE_LIMIT_AUTH: &str = "rate-limit-auth";
pub const ARG_RATE_LIMIT_PRIVATE: &str = "rate-limit-private";
pub const ARG_IDENTITY_TOKEN: &str = "identity-token";
pub const ARG_IDENTITY_KEY: &str = "identity-key";

#[derive(Debug)]
pub struct Options {
    pub rate_limit: RateLimitConfig,
    pub identity_token: bool,
    pub identity_key: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a limit is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            rate_limit: RateLimitConfig {
                public: super::required(matches, ARG_RATE_LIMIT_PUBLIC)?,
                auth: super::required(matches, ARG_RATE_LIMIT_AUTH)?,
                private: super::required(matches, ARG_RATE_LIMIT_PRIVATE)?,
            },
            identity_token: super::required(matches, ARG_IDENTITY_TOKEN)?,
            identity_key: super::required(matches, ARG_IDENTITY_KEY)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_PUBLIC)
                .long(ARG_RATE_LIMIT_PUBLIC)
                .help("Requests per minute per client IP on public endpoints (0 disables)")
                .env("TOLLGATE_RATE_LIMIT_PUBLIC")
                .default_value("0")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_AUTH)
                .long(ARG_RATE_LIMIT_AUTH)
                .help("Requests per minute per client IP on auth endpoints (0 disables)")
                .env("TOLLGATE_RATE_LIMIT_AUTH")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_PRIVATE)
                .long(ARG_RATE_LIMIT_PRIVATE)
                .help("Requests per minute per credential on private endpoints (0 disables)")
                .env("TOLLGATE_RATE_LIMIT_PRIVATE")
                .default_value("0")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(switch(
            ARG_IDENTITY_TOKEN,
            "TOLLGATE_IDENTITY_TOKEN",
            "Accept bearer access tokens on private endpoints",
            "true",
        ))
        .arg(switch(
            ARG_IDENTITY_KEY,
            "TOLLGATE_IDENTITY_KEY",
            "Accept X-API-Key on private endpoints",
            "false",
        ))
}
