use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_MFA_URL: &str = "mfa-url";
pub const ARG_MFA_USER: &str = "mfa-user";
pub const ARG_MFA_PASSWORD: &str = "mfa-password";
pub const ARG_MFA_INSECURE: &str = "mfa-insecure";

/// privacyIDEA API access; the second factor is off when no URL is given.
#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub user: String,
    pub password: SecretString,
    pub insecure: bool,
}

impl Options {
    /// Parse second factor arguments from matches.
    ///
    /// # Errors
    /// Returns an error if `--mfa-url` is set without the API credentials.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<Self>> {
        let Some(url) = matches
            .get_one::<String>(ARG_MFA_URL)
            .filter(|url| !url.trim().is_empty())
            .cloned()
        else {
            return Ok(None);
        };

        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Some(Self {
            url,
            user: read_required(ARG_MFA_USER)?,
            password: SecretString::from(read_required(ARG_MFA_PASSWORD)?),
            insecure: matches.get_flag(ARG_MFA_INSECURE),
        }))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MFA_URL)
                .long(ARG_MFA_URL)
                .help("privacyIDEA base URL; enables the OTP field on the login form")
                .env("OTP_PORTAL_MFA_URL"),
        )
        .arg(
            Arg::new(ARG_MFA_USER)
                .long(ARG_MFA_USER)
                .help("privacyIDEA API user")
                .env("OTP_PORTAL_MFA_USER"),
        )
        .arg(
            Arg::new(ARG_MFA_PASSWORD)
                .long(ARG_MFA_PASSWORD)
                .help("privacyIDEA API password")
                .env("OTP_PORTAL_MFA_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MFA_INSECURE)
                .long(ARG_MFA_INSECURE)
                .help("Skip TLS certificate verification for privacyIDEA")
                .env("OTP_PORTAL_MFA_INSECURE")
                .action(ArgAction::SetTrue),
        )
}
