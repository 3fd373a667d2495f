//! # OTP Portal
//!
//! `otp-portal` is a small web portal where users of an LDAP (Active Directory)
//! domain sign in with their domain credentials and get the QR code of their
//! multiOTP token, or reissue it.
//!
//! ## Flow
//!
//! 1. `POST /user/login` binds to the user domain as `<login>@<domain>` and
//!    reads the `displayName` attribute. An optional privacyIDEA check
//!    validates a second factor.
//! 2. `GET /qr/view` binds to the QR domain with a service account, resolves
//!    the `sAMAccountName` the multiOTP server knows the user by, asks the
//!    `multiotp` CLI for the `otpauth://` URL and renders it as an inline SVG.
//! 3. `GET /qr/reissue` deletes the multiOTP user and resynchronises users
//!    from LDAP, which issues a fresh seed.
//!
//! The multiOTP CLI reports success and failure through exit codes; the
//! [`multiotp`] module maps them to typed outcomes.

pub mod cli;
pub mod ldap;
pub mod mfa;
pub mod multiotp;
pub mod portal;
pub mod qr;
pub mod tls;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
