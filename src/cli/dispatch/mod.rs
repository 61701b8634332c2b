//! Map validated CLI matches to an action.
//!
//! Every gate setting is folded into one immutable [`GateConfig`] here; the
//! server action only decides where state lives.

use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{self, auth, limits, request},
    },
    config::GateConfig,
};
use anyhow::Result;
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if an argument is missing or cannot be interpreted.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();
    let directory = matches
        .get_one::<String>(commands::ARG_DIRECTORY)
        .map(PathBuf::from);
    let sweep_seconds: u64 = commands::required(matches, commands::ARG_CHALLENGE_SWEEP_SECONDS)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        directory,
        challenge_sweep: (sweep_seconds > 0).then(|| Duration::from_secs(sweep_seconds)),
        config: gate_config(matches)?,
    }))
}

/// Build the gate configuration from parsed arguments.
///
/// # Errors
/// Returns an error if an argument is missing or cannot be interpreted.
pub fn gate_config(matches: &clap::ArgMatches) -> Result<GateConfig> {
    let limits = limits::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;
    let request = request::Options::parse(matches)?;

    Ok(GateConfig::new()
        .with_debug(matches.get_flag(commands::ARG_DEBUG))
        .with_environment(commands::required(matches, commands::ARG_ENVIRONMENT)?)
        .with_token_ttl_seconds(commands::required(matches, commands::ARG_TOKEN_TTL_SECONDS)?)
        .with_rate_limit(limits.rate_limit)
        .with_identity(limits.identity_token, limits.identity_key)
        .with_password_enabled(auth.password_enabled)
        .with_tfa(auth.tfa)
        .with_otp(auth.otp)
        .with_refresh_enabled(auth.refresh_enabled)
        .with_password_request(auth.password_request)
        .with_verification(auth.verification)
        .with_request(request.request)
        .with_response_headers(request.response_headers))
}
