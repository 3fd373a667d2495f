use clap::{builder::ValueParser, Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_DIR: &str = "log-dir";
pub const ARG_KEEP_LOGS: &str = "keep-logs";

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Directory for daily-rotated JSON log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,
    pub keep_logs: usize,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            log_dir: matches
                .get_one::<String>(ARG_LOG_DIR)
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            keep_logs: matches.get_one::<usize>(ARG_KEEP_LOGS).copied().unwrap_or(7),
        }
    }
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("OTP_PORTAL_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_DIR)
                .long(ARG_LOG_DIR)
                .help("Also write JSON logs to daily rotated files in this directory")
                .env("OTP_PORTAL_LOG_DIR"),
        )
        .arg(
            Arg::new(ARG_KEEP_LOGS)
                .long(ARG_KEEP_LOGS)
                .help("Number of rotated log files to keep")
                .env("OTP_PORTAL_KEEP_LOGS")
                .default_value("7")
                .value_parser(clap::value_parser!(usize)),
        )
}
