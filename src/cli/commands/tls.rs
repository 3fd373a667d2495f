use crate::tls::TlsPaths;
use clap::{Arg, ArgMatches, Command};

pub const ARG_TLS_CERT: &str = "tls-cert";
pub const ARG_TLS_KEY: &str = "tls-key";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub paths: Option<TlsPaths>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let cert = matches.get_one::<String>(ARG_TLS_CERT).cloned();
        let key = matches.get_one::<String>(ARG_TLS_KEY).cloned();

        Self {
            paths: cert
                .zip(key)
                .map(|(cert, key)| TlsPaths::from_cli(cert, key)),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TLS_CERT)
                .long(ARG_TLS_CERT)
                .help("Path to TLS certificate chain (PEM); serve plain HTTP when omitted")
                .env("OTP_PORTAL_TLS_CERT")
                .requires(ARG_TLS_KEY),
        )
        .arg(
            Arg::new(ARG_TLS_KEY)
                .long(ARG_TLS_KEY)
                .help("Path to TLS private key (PEM)")
                .env("OTP_PORTAL_TLS_KEY")
                .requires(ARG_TLS_CERT),
        )
}
