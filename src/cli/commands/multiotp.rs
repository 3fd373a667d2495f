use clap::{Arg, ArgMatches, Command};
use std::{path::PathBuf, time::Duration};

pub const ARG_MULTIOTP_BIN: &str = "multiotp-bin";
pub const ARG_MULTIOTP_TIMEOUT: &str = "multiotp-timeout";

pub const DEFAULT_MULTIOTP_BIN: &str = "/usr/local/bin/multiotp";

#[derive(Debug, Clone)]
pub struct Options {
    pub bin: PathBuf,
    pub timeout: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            bin: PathBuf::from(
                matches
                    .get_one::<String>(ARG_MULTIOTP_BIN)
                    .map_or(DEFAULT_MULTIOTP_BIN, String::as_str),
            ),
            timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_MULTIOTP_TIMEOUT)
                    .copied()
                    .unwrap_or(30),
            ),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MULTIOTP_BIN)
                .long(ARG_MULTIOTP_BIN)
                .help("Path to the multiotp executable")
                .env("OTP_PORTAL_MULTIOTP_BIN")
                .default_value(DEFAULT_MULTIOTP_BIN),
        )
        .arg(
            Arg::new(ARG_MULTIOTP_TIMEOUT)
                .long(ARG_MULTIOTP_TIMEOUT)
                .help("Seconds a multiotp invocation may run before it is killed")
                .env("OTP_PORTAL_MULTIOTP_TIMEOUT")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        temp_env::with_vars(
            [
                ("OTP_PORTAL_MULTIOTP_BIN", None::<&str>),
                ("OTP_PORTAL_MULTIOTP_TIMEOUT", None),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let options = Options::parse(&matches);
                assert_eq!(options.bin, PathBuf::from(DEFAULT_MULTIOTP_BIN));
                assert_eq!(options.timeout, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn from_args() {
        let matches = with_args(Command::new("test")).get_matches_from(vec![
            "test",
            "--multiotp-bin",
            "/opt/multiotp/multiotp.php",
            "--multiotp-timeout",
            "5",
        ]);
        let options = Options::parse(&matches);
        assert_eq!(options.bin, PathBuf::from("/opt/multiotp/multiotp.php"));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
