use crate::{
    cli::{commands::mfa, telemetry},
    ldap::{DomainConfig, LdapDirectory, ServiceAccount},
    mfa::{PrivacyIdea, PrivacyIdeaConfig},
    multiotp::MultiOtp,
    portal::{self, i18n::Lang, session::SessionStore, PortalState},
    tls::TlsPaths,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};

const MFA_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub user_domain: DomainConfig,
    pub qr_domain: DomainConfig,
    pub qr_bind: ServiceAccount,
    pub ldap_timeout: Duration,
    pub multiotp_bin: PathBuf,
    pub multiotp_timeout: Duration,
    pub mfa: Option<mfa::Options>,
    pub tls: Option<TlsPaths>,
    pub session_ttl: Duration,
    pub lang: Lang,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the second factor client or the server cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let multiotp = MultiOtp::new(args.multiotp_bin, args.multiotp_timeout);
    if !multiotp.is_installed() {
        warn!(
            "multiotp binary not found at {}, QR codes will not be available",
            multiotp.bin().display()
        );
    }

    let directory = LdapDirectory::new(
        args.user_domain.clone(),
        args.qr_domain,
        args.qr_bind,
        args.ldap_timeout,
    );

    let sessions = Arc::new(SessionStore::new(args.session_ttl));

    let mut state = PortalState::new(Arc::new(directory), multiotp, sessions)
        .with_lang(args.lang)
        .with_secure_cookies(args.tls.is_some());

    if let Some(mfa) = args.mfa {
        let privacy_idea = PrivacyIdea::new(PrivacyIdeaConfig {
            url: mfa.url,
            // privacyIDEA realms are named after the user domain
            realm: args.user_domain.fqdn,
            api_user: mfa.user,
            api_password: mfa.password,
            insecure: mfa.insecure,
            timeout: Duration::from_secs(MFA_TIMEOUT_SECONDS),
        })
        .context("Failed to set up the privacyIDEA client")?;
        state = state.with_second_factor(Arc::new(privacy_idea));
    }

    let result = portal::new(args.port, state, args.tls).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let scheme = if args.tls.is_some() { "https" } else { "http" };
    let entries = [
        ("listen", format!("{scheme}://[::]:{}", args.port)),
        (
            "user_domain",
            format!("{} ({})", args.user_domain.fqdn, args.user_domain.base_dn),
        ),
        (
            "qr_domain",
            format!("{} ({})", args.qr_domain.fqdn, args.qr_domain.base_dn),
        ),
        ("qr_bind_user", args.qr_bind.user.clone()),
        ("ldap_timeout", format!("{}s", args.ldap_timeout.as_secs())),
        ("multiotp_bin", args.multiotp_bin.display().to_string()),
        (
            "multiotp_timeout",
            format!("{}s", args.multiotp_timeout.as_secs()),
        ),
        (
            "mfa_url",
            args.mfa
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |mfa| mfa.url.clone()),
        ),
        (
            "tls_cert",
            args.tls.as_ref().map_or_else(
                || "none".to_string(),
                |tls| tls.cert_path().display().to_string(),
            ),
        ),
        ("session_ttl", format!("{}s", args.session_ttl.as_secs())),
        ("lang", args.lang.to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }
}
