use crate::{
    api::{self, state::{AppState, Collaborators}},
    clock::{Clock, SystemClock},
    config::GateConfig,
    events::{DevEchoObserver, GateObserver, LogObserver},
    store::{
        memory::MemoryDirectory,
        postgres::{self, PgBucketStore, PgChallengeStore},
    },
};
use anyhow::Result;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

const MAX_DB_CONNECTIONS: u32 = 5;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub directory: Option<PathBuf>,
    pub challenge_sweep: Option<Duration>,
    pub config: GateConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the directory cannot be loaded, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let observer: Arc<dyn GateObserver> = if args.config.debug() {
        warn!("debug mode: issued codes are written to the log");
        Arc::new(DevEchoObserver)
    } else {
        Arc::new(LogObserver)
    };

    let directory = match &args.directory {
        Some(path) => MemoryDirectory::load_file(path, clock.clone()).await?,
        None => MemoryDirectory::new(clock.clone()),
    }
    .with_access_ttl_seconds(args.config.token_ttl_seconds());

    let mut collaborators = Collaborators::in_memory(Arc::new(directory), clock, observer);

    if let Some(dsn) = &args.dsn {
        let pool = postgres::connect(dsn, MAX_DB_CONNECTIONS).await?;
        collaborators = collaborators
            .with_buckets(Arc::new(PgBucketStore::new(pool.clone())))
            .with_challenges(Arc::new(PgChallengeStore::new(pool)));
    }

    let state = AppState::new(Arc::new(args.config), collaborators);

    api::new(args.port, state, args.challenge_sweep).await
}

fn log_startup_args(args: &Args) {
    let config = &args.config;
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "storage",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        (
            "directory",
            args.directory
                .as_ref()
                .map_or_else(|| "none".to_string(), |path| path.display().to_string()),
        ),
        ("environment", config.environment().to_string()),
        ("https_required", config.requires_https().to_string()),
        (
            "rate_limits",
            format!(
                "public={} auth={} private={}",
                config.rate_limit().public,
                config.rate_limit().auth,
                config.rate_limit().private
            ),
        ),
        (
            "identity",
            format!(
                "token={} key={}",
                config.identity_token(),
                config.identity_key()
            ),
        ),
        ("tfa_enabled", config.tfa().enabled.to_string()),
        ("otp_enabled", config.otp().enabled.to_string()),
        (
            "trusted_proxies",
            if config.request().trusted_proxies.is_empty() {
                "none".to_string()
            } else {
                config
                    .request()
                    .trusted_proxies
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            },
        ),
        (
            "challenge_sweep",
            args.challenge_sweep
                .map_or_else(|| "off".to_string(), |every| format!("{}s", every.as_secs())),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} ({})\n\n{title}:",
        crate::APP_USER_AGENT,
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
