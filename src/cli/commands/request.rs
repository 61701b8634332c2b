use crate::config::{parse_header_pairs, parse_list, RequestConfig};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::net::IpAddr;

pub const ARG_REQUEST_HEADERS: &str = "request-headers";
pub const ARG_HTTPS_ENV: &str = "https-env";
pub const ARG_IP_WHITELIST: &str = "ip-whitelist";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";
pub const ARG_RESPONSE_HEADERS: &str = "response-headers";

#[derive(Debug)]
pub struct Options {
    pub request: RequestConfig,
    pub response_headers: Vec<(String, String)>,
}

impl Options {
    /// # Errors
    /// Returns an error if an allowlist or trusted proxy entry is not an IP
    /// address.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let text = |id: &str| matches.get_one::<String>(id).map(String::as_str);
        let ips = |id: &str| -> Result<Vec<IpAddr>> {
            text(id)
                .map(parse_list)
                .unwrap_or_default()
                .iter()
                .map(|entry| {
                    entry
                        .parse::<IpAddr>()
                        .with_context(|| format!("invalid --{id} entry: {entry}"))
                })
                .collect()
        };

        Ok(Self {
            request: RequestConfig {
                headers: text(ARG_REQUEST_HEADERS)
                    .map(parse_header_pairs)
                    .unwrap_or_default(),
                https_env: text(ARG_HTTPS_ENV).map(parse_list).unwrap_or_default(),
                ip_whitelist: ips(ARG_IP_WHITELIST)?,
                trusted_proxies: ips(ARG_TRUSTED_PROXIES)?,
            },
            response_headers: text(ARG_RESPONSE_HEADERS)
                .map(parse_header_pairs)
                .unwrap_or_default(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUEST_HEADERS)
                .long(ARG_REQUEST_HEADERS)
                .help("Headers every request must carry, as name=value pairs separated by commas")
                .env("TOLLGATE_REQUEST_HEADERS"),
        )
        .arg(
            Arg::new(ARG_HTTPS_ENV)
                .long(ARG_HTTPS_ENV)
                .help("Comma separated environments that must be served over HTTPS")
                .env("TOLLGATE_HTTPS_ENV"),
        )
        .arg(
            Arg::new(ARG_IP_WHITELIST)
                .long(ARG_IP_WHITELIST)
                .help("Comma separated client IPs allowed to reach the API (empty allows all)")
                .env("TOLLGATE_IP_WHITELIST"),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma separated proxy IPs whose X-Forwarded-For, X-Real-IP and X-Forwarded-Proto headers are believed")
                .env("TOLLGATE_TRUSTED_PROXIES"),
        )
        .arg(
            Arg::new(ARG_RESPONSE_HEADERS)
                .long(ARG_RESPONSE_HEADERS)
                .help("Headers added to every response, as name=value pairs separated by commas")
                .env("TOLLGATE_RESPONSE_HEADERS"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lists_and_pairs() -> Result<()> {
        let matches = with_args(Command::new("tollgate")).try_get_matches_from(vec![
            "tollgate",
            "--request-headers",
            "x-client=web",
            "--https-env",
            "production, staging",
            "--ip-whitelist",
            "10.0.0.1,::1",
            "--trusted-proxies",
            "172.16.0.2",
            "--response-headers",
            "x-frame-options=DENY",
        ])?;
        let options = Options::parse(&matches)?;
        assert_eq!(
            options.request.headers,
            vec![("x-client".to_string(), "web".to_string())]
        );
        assert_eq!(options.request.https_env, vec!["production", "staging"]);
        assert_eq!(options.request.ip_whitelist.len(), 2);
        assert_eq!(
            options.request.trusted_proxies,
            vec![IpAddr::from([172, 16, 0, 2])]
        );
        assert_eq!(options.response_headers.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_invalid_ip() -> Result<()> {
        let matches = with_args(Command::new("tollgate"))
            .try_get_matches_from(vec!["tollgate", "--ip-whitelist", "10.0.0.1,not-an-ip"])?;
        let err = Options::parse(&matches).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("invalid --ip-whitelist entry: not-an-ip")
        );

        let matches = with_args(Command::new("tollgate"))
            .try_get_matches_from(vec!["tollgate", "--trusted-proxies", "proxy.local"])?;
        let err = Options::parse(&matches).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("invalid --trusted-proxies entry: proxy.local")
        );
        Ok(())
    }
}
