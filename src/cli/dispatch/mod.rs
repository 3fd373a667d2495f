//! Map validated CLI matches to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{ldap, mfa, multiotp, session, tls, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(3000);

    let ldap_opts = ldap::Options::parse(matches)?;
    let multiotp_opts = multiotp::Options::parse(matches);
    let mfa_opts = mfa::Options::parse(matches)?;
    let tls_opts = tls::Options::parse(matches);
    let session_opts = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        user_domain: ldap_opts.user_domain,
        qr_domain: ldap_opts.qr_domain,
        qr_bind: ldap_opts.qr_bind,
        ldap_timeout: ldap_opts.timeout,
        multiotp_bin: multiotp_opts.bin,
        multiotp_timeout: multiotp_opts.timeout,
        mfa: mfa_opts,
        tls: tls_opts.paths,
        session_ttl: session_opts.ttl,
        lang: session_opts.lang,
    }))
}
