use crate::ldap::{DomainConfig, ServiceAccount};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_USER_DOMAIN_FQDN: &str = "user-domain-fqdn";
pub const ARG_USER_DOMAIN_BASE_DN: &str = "user-domain-base-dn";
pub const ARG_QR_DOMAIN_FQDN: &str = "qr-domain-fqdn";
pub const ARG_QR_DOMAIN_BASE_DN: &str = "qr-domain-base-dn";
pub const ARG_QR_DOMAIN_BIND_USER: &str = "qr-domain-bind-user";
pub const ARG_QR_DOMAIN_BIND_PASSWORD: &str = "qr-domain-bind-password";
pub const ARG_LDAP_TIMEOUT: &str = "ldap-timeout";

#[derive(Debug, Clone)]
pub struct Options {
    pub user_domain: DomainConfig,
    pub qr_domain: DomainConfig,
    pub qr_bind: ServiceAccount,
    pub timeout: Duration,
}

impl Options {
    /// Parse LDAP arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            user_domain: DomainConfig {
                fqdn: read_required(ARG_USER_DOMAIN_FQDN)?,
                base_dn: read_required(ARG_USER_DOMAIN_BASE_DN)?,
            },
            qr_domain: DomainConfig {
                fqdn: read_required(ARG_QR_DOMAIN_FQDN)?,
                base_dn: read_required(ARG_QR_DOMAIN_BASE_DN)?,
            },
            qr_bind: ServiceAccount {
                user: read_required(ARG_QR_DOMAIN_BIND_USER)?,
                password: SecretString::from(read_required(ARG_QR_DOMAIN_BIND_PASSWORD)?),
            },
            timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_LDAP_TIMEOUT)
                    .copied()
                    .unwrap_or(10),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_USER_DOMAIN_FQDN)
                .long(ARG_USER_DOMAIN_FQDN)
                .help("FQDN of the domain users log in with, e.g. corp.example.com")
                .env("OTP_PORTAL_USER_DOMAIN_FQDN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_USER_DOMAIN_BASE_DN)
                .long(ARG_USER_DOMAIN_BASE_DN)
                .help("Search base of the user domain, e.g. DC=corp,DC=example,DC=com")
                .env("OTP_PORTAL_USER_DOMAIN_BASE_DN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_QR_DOMAIN_FQDN)
                .long(ARG_QR_DOMAIN_FQDN)
                .help("FQDN of the domain multiOTP syncs its users from")
                .env("OTP_PORTAL_QR_DOMAIN_FQDN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_QR_DOMAIN_BASE_DN)
                .long(ARG_QR_DOMAIN_BASE_DN)
                .help("Search base of the QR domain")
                .env("OTP_PORTAL_QR_DOMAIN_BASE_DN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_QR_DOMAIN_BIND_USER)
                .long(ARG_QR_DOMAIN_BIND_USER)
                .help("Service account used to search the QR domain")
                .env("OTP_PORTAL_QR_DOMAIN_BIND_USER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_QR_DOMAIN_BIND_PASSWORD)
                .long(ARG_QR_DOMAIN_BIND_PASSWORD)
                .help("Password of the QR domain service account")
                .env("OTP_PORTAL_QR_DOMAIN_BIND_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_LDAP_TIMEOUT)
                .long(ARG_LDAP_TIMEOUT)
                .help("LDAP connection timeout in seconds")
                .env("OTP_PORTAL_LDAP_TIMEOUT")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn parse_from_env() {
        temp_env::with_vars(
            [
                ("OTP_PORTAL_USER_DOMAIN_FQDN", Some("corp.example.com")),
                ("OTP_PORTAL_USER_DOMAIN_BASE_DN", Some("DC=corp,DC=example,DC=com")),
                ("OTP_PORTAL_QR_DOMAIN_FQDN", Some("otp.example.com")),
                ("OTP_PORTAL_QR_DOMAIN_BASE_DN", Some("DC=otp,DC=example,DC=com")),
                ("OTP_PORTAL_QR_DOMAIN_BIND_USER", Some("svc-otp")),
                ("OTP_PORTAL_QR_DOMAIN_BIND_PASSWORD", Some("s3cret")),
                ("OTP_PORTAL_LDAP_TIMEOUT", None),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let options = Options::parse(&matches).expect("options");

                assert_eq!(options.user_domain.fqdn, "corp.example.com");
                assert_eq!(options.qr_domain.base_dn, "DC=otp,DC=example,DC=com");
                assert_eq!(options.qr_bind.user, "svc-otp");
                assert_eq!(options.qr_bind.password.expose_secret(), "s3cret");
                assert_eq!(options.timeout, Duration::from_secs(10));
            },
        );
    }

    #[test]
    fn blank_values_are_rejected() {
        temp_env::with_vars(
            [
                ("OTP_PORTAL_USER_DOMAIN_FQDN", Some("corp.example.com")),
                ("OTP_PORTAL_USER_DOMAIN_BASE_DN", Some("DC=corp,DC=example,DC=com")),
                ("OTP_PORTAL_QR_DOMAIN_FQDN", Some("otp.example.com")),
                ("OTP_PORTAL_QR_DOMAIN_BASE_DN", Some("DC=otp,DC=example,DC=com")),
                ("OTP_PORTAL_QR_DOMAIN_BIND_USER", Some(" ")),
                ("OTP_PORTAL_QR_DOMAIN_BIND_PASSWORD", Some("s3cret")),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let err = Options::parse(&matches).unwrap_err();
                assert!(err
                    .to_string()
                    .contains("missing required argument: --qr-domain-bind-user"));
            },
        );
    }
}
