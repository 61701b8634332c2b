use super::{required, switch};
use crate::{config::OtpSettings, otp::OtpAlphabet};
use anyhow::Result;
use clap::{builder::ValueParser, Arg, ArgMatches, Command};

pub const ARG_PASSWORD_ENABLED: &str = "auth-password-enabled";
pub const ARG_REFRESH_ENABLED: &str = "auth-refresh-enabled";

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 32;

/// Argument names and defaults for one challenge purpose.
pub struct ChallengeArgs {
    pub enabled: (&'static str, &'static str),
    pub wait: (&'static str, &'static str),
    pub duration: (&'static str, &'static str),
    pub length: (&'static str, &'static str),
    pub kind: (&'static str, &'static str),
    pub about: &'static str,
    pub default_duration: &'static str,
    pub default_length: &'static str,
    pub default_kind: &'static str,
}

pub const TFA: ChallengeArgs = ChallengeArgs {
    enabled: ("auth-tfa-enabled", "TOLLGATE_AUTH_TFA_ENABLED"),
    wait: ("auth-tfa-wait", "TOLLGATE_AUTH_TFA_WAIT"),
    duration: ("auth-tfa-duration", "TOLLGATE_AUTH_TFA_DURATION"),
    length: ("auth-tfa-length", "TOLLGATE_AUTH_TFA_LENGTH"),
    kind: ("auth-tfa-type", "TOLLGATE_AUTH_TFA_TYPE"),
    about: "second factor after password login",
    default_duration: "300",
    default_length: "6",
    default_kind: "numeric",
};

pub const OTP: ChallengeArgs = ChallengeArgs {
    enabled: ("auth-otp-enabled", "TOLLGATE_AUTH_OTP_ENABLED"),
    wait: ("auth-otp-wait", "TOLLGATE_AUTH_OTP_WAIT"),
    duration: ("auth-otp-duration", "TOLLGATE_AUTH_OTP_DURATION"),
    length: ("auth-otp-length", "TOLLGATE_AUTH_OTP_LENGTH"),
    kind: ("auth-otp-type", "TOLLGATE_AUTH_OTP_TYPE"),
    about: "passwordless sign-in",
    default_duration: "600",
    default_length: "6",
    default_kind: "numeric",
};

pub const PASSWORD_REQUEST: ChallengeArgs = ChallengeArgs {
    enabled: ("password-request-enabled", "TOLLGATE_PASSWORD_REQUEST_ENABLED"),
    wait: ("password-request-wait", "TOLLGATE_PASSWORD_REQUEST_WAIT"),
    duration: ("password-request-duration", "TOLLGATE_PASSWORD_REQUEST_DURATION"),
    length: ("password-request-length", "TOLLGATE_PASSWORD_REQUEST_LENGTH"),
    kind: ("password-request-type", "TOLLGATE_PASSWORD_REQUEST_TYPE"),
    about: "password reset",
    default_duration: "900",
    default_length: "8",
    default_kind: "alphanumeric",
};

pub const VERIFICATION: ChallengeArgs = ChallengeArgs {
    enabled: ("verification-enabled", "TOLLGATE_VERIFICATION_ENABLED"),
    wait: ("verification-wait", "TOLLGATE_VERIFICATION_WAIT"),
    duration: ("verification-duration", "TOLLGATE_VERIFICATION_DURATION"),
    length: ("verification-length", "TOLLGATE_VERIFICATION_LENGTH"),
    kind: ("verification-type", "TOLLGATE_VERIFICATION_TYPE"),
    about: "email verification",
    default_duration: "86400",
    default_length: "8",
    default_kind: "alphanumeric",
};

impl ChallengeArgs {
    fn register(&self, command: Command) -> Command {
        command
            .arg(switch(self.enabled.0, self.enabled.1, self.about, "false"))
            .arg(
                Arg::new(self.wait.0)
                    .long(self.wait.0)
                    .help("Seconds before a code may be re-issued")
                    .env(self.wait.1)
                    .default_value("60")
                    .value_parser(clap::value_parser!(i64).range(0..)),
            )
            .arg(
                Arg::new(self.duration.0)
                    .long(self.duration.0)
                    .help("Seconds a code stays valid")
                    .env(self.duration.1)
                    .default_value(self.default_duration)
                    .value_parser(clap::value_parser!(i64).range(1..)),
            )
            .arg(
                Arg::new(self.length.0)
                    .long(self.length.0)
                    .help("Code length (4 to 32)")
                    .env(self.length.1)
                    .default_value(self.default_length)
                    .value_parser(validator_code_length()),
            )
            .arg(
                Arg::new(self.kind.0)
                    .long(self.kind.0)
                    .help("Code alphabet: numeric, alpha or alphanumeric")
                    .env(self.kind.1)
                    .default_value(self.default_kind)
                    .value_parser(|value: &str| value.parse::<OtpAlphabet>()),
            )
    }

    /// # Errors
    /// Returns an error if one of the purpose arguments is missing.
    pub fn parse(&self, matches: &ArgMatches) -> Result<OtpSettings> {
        Ok(OtpSettings::new(
            required(matches, self.wait.0)?,
            required(matches, self.duration.0)?,
            required(matches, self.length.0)?,
            required(matches, self.kind.0)?,
        )
        .enabled(required(matches, self.enabled.0)?))
    }
}

#[must_use]
pub fn validator_code_length() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<usize, String> {
        let length = value
            .parse::<usize>()
            .map_err(|_| format!("invalid code length: {value}"))?;
        if (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            Ok(length)
        } else {
            Err(format!(
                "code length must be between {MIN_CODE_LENGTH} and {MAX_CODE_LENGTH}"
            ))
        }
    })
}

#[derive(Debug)]
pub struct Options {
    pub password_enabled: bool,
    pub refresh_enabled: bool,
    pub tfa: OtpSettings,
    pub otp: OtpSettings,
    pub password_request: OtpSettings,
    pub verification: OtpSettings,
}

impl Options {
    /// # Errors
    /// Returns an error if an auth argument is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            password_enabled: required(matches, ARG_PASSWORD_ENABLED)?,
            refresh_enabled: required(matches, ARG_REFRESH_ENABLED)?,
            tfa: TFA.parse(matches)?,
            otp: OTP.parse(matches)?,
            password_request: PASSWORD_REQUEST.parse(matches)?,
            verification: VERIFICATION.parse(matches)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(switch(
            ARG_PASSWORD_ENABLED,
            "TOLLGATE_AUTH_PASSWORD_ENABLED",
            "Enable email and password login",
            "true",
        ))
        .arg(switch(
            ARG_REFRESH_ENABLED,
            "TOLLGATE_AUTH_REFRESH_ENABLED",
            "Enable refresh token exchange",
            "true",
        ));

    [TFA, OTP, PASSWORD_REQUEST, VERIFICATION]
        .iter()
        .fold(command, |command, purpose| purpose.register(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_purposes() -> Result<()> {
        temp_env::with_vars(
            [
                ("TOLLGATE_AUTH_TFA_ENABLED", None::<&str>),
                ("TOLLGATE_VERIFICATION_TYPE", None::<&str>),
            ],
            || {
                let matches =
                    with_args(Command::new("tollgate")).try_get_matches_from(vec!["tollgate"])?;
                let options = Options::parse(&matches)?;
                assert!(options.password_enabled);
                assert!(!options.tfa.enabled);
                assert_eq!(options.tfa.duration_seconds, 300);
                assert_eq!(options.otp.duration_seconds, 600);
                assert_eq!(options.password_request.length, 8);
                assert_eq!(options.verification.alphabet, OtpAlphabet::Alphanumeric);
                assert_eq!(options.verification.duration_seconds, 86_400);
                Ok(())
            },
        )
    }

    #[test]
    fn flags_and_env_override_defaults() -> Result<()> {
        temp_env::with_vars(
            [
                ("TOLLGATE_AUTH_TFA_ENABLED", Some("true")),
                ("TOLLGATE_AUTH_TFA_TYPE", Some("alpha")),
            ],
            || {
                let matches = with_args(Command::new("tollgate")).try_get_matches_from(vec![
                    "tollgate",
                    "--auth-tfa-length",
                    "10",
                    "--auth-otp-enabled",
                    "--auth-refresh-enabled",
                    "false",
                ])?;
                let options = Options::parse(&matches)?;
                assert!(options.tfa.enabled);
                assert_eq!(options.tfa.length, 10);
                assert_eq!(options.tfa.alphabet, OtpAlphabet::Alphabetic);
                assert!(options.otp.enabled);
                assert!(!options.refresh_enabled);
                Ok(())
            },
        )
    }

    #[test]
    fn code_length_is_bounded() {
        for length in ["3", "33", "six"] {
            let result = with_args(Command::new("tollgate")).try_get_matches_from(vec![
                "tollgate",
                "--auth-otp-length",
                length,
            ]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::ValueValidation),
                "length {length} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_code_type_is_rejected() {
        let result = with_args(Command::new("tollgate")).try_get_matches_from(vec![
            "tollgate",
            "--auth-tfa-type",
            "emoji",
        ]);
        assert!(result.is_err());
    }
}
