use crate::portal::{i18n::Lang, session::DEFAULT_SESSION_TTL_SECONDS};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_LANG: &str = "lang";

#[derive(Debug, Clone)]
pub struct Options {
    pub ttl: Duration,
    pub lang: Lang,
}

impl Options {
    /// Parse session and presentation arguments from matches.
    ///
    /// # Errors
    /// Returns an error for an unsupported language.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let lang = match matches.get_one::<String>(ARG_LANG) {
            Some(lang) => lang.parse::<Lang>().map_err(anyhow::Error::msg)?,
            None => Lang::default(),
        };

        Ok(Self {
            ttl: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_SESSION_TTL)
                    .copied()
                    .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
            ),
            lang,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds")
                .env("OTP_PORTAL_SESSION_TTL")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64).range(60..)),
        )
        .arg(
            Arg::new(ARG_LANG)
                .long(ARG_LANG)
                .help("Language of the web pages")
                .env("OTP_PORTAL_LANG")
                .default_value("en")
                .value_parser(["en", "ru"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        temp_env::with_vars(
            [
                ("OTP_PORTAL_SESSION_TTL", None::<&str>),
                ("OTP_PORTAL_LANG", None),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let options = Options::parse(&matches).expect("options");
                assert_eq!(options.ttl, Duration::from_secs(12 * 60 * 60));
                assert_eq!(options.lang, Lang::En);
            },
        );
    }

    #[test]
    fn russian_from_env() {
        temp_env::with_vars([("OTP_PORTAL_LANG", Some("ru"))], || {
            let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
            assert_eq!(Options::parse(&matches).expect("options").lang, Lang::Ru);
        });
    }

    #[test]
    fn rejects_short_ttl() {
        let result = with_args(Command::new("test")).try_get_matches_from(vec![
            "test",
            "--session-ttl",
            "10",
        ]);
        assert!(result.is_err());
    }
}
