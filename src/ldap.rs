//! LDAP lookups used for sign-in and for mapping users to their multiOTP account.
//!
//! Two domains are involved and they may be the same directory:
//!
//! * the **user domain**, where people authenticate with their own
//!   credentials (`<login>@<fqdn>`) and where `displayName` is read;
//! * the **QR domain**, searched with a service account to find the
//!   `sAMAccountName` that multiOTP synchronised the user as.
//!
//! Every call opens its own connection on port 389, upgrades it with StartTLS
//! and closes it afterwards. Certificates are not verified: domain controllers
//! commonly present certificates from an internal CA.

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const LDAP_PORT: u16 = 389;
pub const ATTR_DISPLAY_NAME: &str = "displayName";
pub const ATTR_SAM_ACCOUNT_NAME: &str = "sAMAccountName";
/// `invalidCredentials` result code of a rejected bind.
pub const RC_INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Error)]
pub enum LdapError {
    #[error("LDAP connection to {host} failed: {source}")]
    Connect {
        host: String,
        source: ldap3::LdapError,
    },
    #[error("LDAP bind as {user} failed: {source}")]
    Bind {
        user: String,
        source: ldap3::LdapError,
    },
    #[error("empty password for {0}")]
    EmptyPassword(String),
    #[error("LDAP search failed: {0}")]
    Search(#[source] ldap3::LdapError),
    #[error("empty result")]
    EmptyResult,
    #[error("attribute {0} not found")]
    MissingAttribute(String),
}

impl LdapError {
    /// Whether the error means the supplied credentials were rejected, as
    /// opposed to the directory being unreachable.
    #[must_use]
    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            Self::EmptyPassword(_) => true,
            Self::Bind {
                source: ldap3::LdapError::LdapResult { result },
                ..
            } => result.rc == RC_INVALID_CREDENTIALS,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub fqdn: String,
    pub base_dn: String,
}

#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub user: String,
    pub password: SecretString,
}

/// A user who passed the LDAP bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub account: String,
    pub display_name: Option<String>,
}

impl UserIdentity {
    /// Name to greet the user with.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.account,
        }
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Bind to the user domain with the user's own credentials.
    async fn authenticate(
        &self,
        login: &str,
        password: &SecretString,
    ) -> Result<UserIdentity, LdapError>;

    /// Resolve the QR-domain `sAMAccountName` for a user-domain account.
    async fn qr_account(&self, account: &str) -> Result<String, LdapError>;

    /// Cheap reachability probe used by the health endpoint.
    async fn ping(&self) -> Result<(), LdapError>;
}

/// An open, StartTLS-protected connection.
pub struct LdapSession {
    ldap: Ldap,
    timeout: Duration,
}

impl LdapSession {
    /// Connect to `ldap://<fqdn>:389` and upgrade with StartTLS.
    ///
    /// # Errors
    /// Returns [`LdapError::Connect`] if the host is unreachable or StartTLS fails.
    pub async fn connect(fqdn: &str, timeout: Duration) -> Result<Self, LdapError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(true)
            .set_no_tls_verify(true);

        let url = format!("ldap://{fqdn}:{LDAP_PORT}");
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|source| LdapError::Connect {
                host: fqdn.to_string(),
                source,
            })?;
        ldap3::drive!(conn);

        Ok(Self { ldap, timeout })
    }

    /// Simple bind.
    ///
    /// # Errors
    /// Returns [`LdapError::EmptyPassword`] without contacting the server when
    /// the password is empty, since an empty simple bind is an anonymous bind.
    pub async fn bind(&mut self, user: &str, password: &SecretString) -> Result<(), LdapError> {
        if password.expose_secret().is_empty() {
            return Err(LdapError::EmptyPassword(user.to_string()));
        }

        let bind_error = |source| LdapError::Bind {
            user: user.to_string(),
            source,
        };

        self.ldap
            .with_timeout(self.timeout)
            .simple_bind(user, password.expose_secret())
            .await
            .map_err(bind_error)?
            .success()
            .map_err(bind_error)?;

        Ok(())
    }

    /// Subtree search. An empty result is an error.
    ///
    /// # Errors
    /// Returns [`LdapError::Search`] on protocol errors and
    /// [`LdapError::EmptyResult`] when nothing matched.
    pub async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapError> {
        let (entries, _) = self
            .ldap
            .with_timeout(self.timeout)
            .search(base_dn, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(LdapError::Search)?
            .success()
            .map_err(LdapError::Search)?;

        if entries.is_empty() {
            return Err(LdapError::EmptyResult);
        }

        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    /// First value of `attr` on the first matching entry.
    ///
    /// # Errors
    /// Returns an error if the search fails or the attribute is absent.
    pub async fn get_attr(
        &mut self,
        base_dn: &str,
        filter: &str,
        attr: &str,
    ) -> Result<String, LdapError> {
        let entries = self.search(base_dn, filter, &[attr]).await?;
        entries
            .first()
            .and_then(|entry| first_value(entry, attr))
            .ok_or_else(|| LdapError::MissingAttribute(attr.to_string()))
    }

    pub async fn close(mut self) {
        if let Err(err) = self.ldap.unbind().await {
            debug!("LDAP unbind failed: {err}");
        }
    }
}

// Servers may return attribute names in a different case than requested.
fn first_value(entry: &SearchEntry, attr: &str) -> Option<String> {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .and_then(|(_, values)| values.first())
        .cloned()
}

/// User principal name used for binds.
#[must_use]
pub fn bind_name(user: &str, fqdn: &str) -> String {
    format!("{user}@{fqdn}")
}

#[must_use]
pub fn user_filter(login: &str) -> String {
    format!("(&(objectClass=user)(samaccountname={}))", ldap_escape(login))
}

/// QR-domain accounts may carry a prefix, so the account is matched as a suffix.
#[must_use]
pub fn qr_account_filter(account: &str) -> String {
    format!("(&(objectClass=user)(samaccountname=*{}))", ldap_escape(account))
}

/// Directory backed by real LDAP servers.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    user_domain: DomainConfig,
    qr_domain: DomainConfig,
    qr_bind: ServiceAccount,
    timeout: Duration,
}

impl LdapDirectory {
    #[must_use]
    pub fn new(
        user_domain: DomainConfig,
        qr_domain: DomainConfig,
        qr_bind: ServiceAccount,
        timeout: Duration,
    ) -> Self {
        Self {
            user_domain,
            qr_domain,
            qr_bind,
            timeout,
        }
    }

    async fn qr_session(&self) -> Result<LdapSession, LdapError> {
        let mut session = LdapSession::connect(&self.qr_domain.fqdn, self.timeout).await?;
        let bind_user = bind_name(&self.qr_bind.user, &self.qr_domain.fqdn);
        if let Err(err) = session.bind(&bind_user, &self.qr_bind.password).await {
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    #[instrument(skip(self, password))]
    async fn authenticate(
        &self,
        login: &str,
        password: &SecretString,
    ) -> Result<UserIdentity, LdapError> {
        let bind_user = bind_name(login, &self.user_domain.fqdn);

        // reject before dialing, an empty password would be an anonymous bind
        if password.expose_secret().is_empty() {
            return Err(LdapError::EmptyPassword(bind_user));
        }

        let mut session = LdapSession::connect(&self.user_domain.fqdn, self.timeout).await?;

        debug!(user = %bind_user, "making LDAP bind");
        if let Err(err) = session.bind(&bind_user, password).await {
            session.close().await;
            return Err(err);
        }

        let display_name = match session
            .get_attr(
                &self.user_domain.base_dn,
                &user_filter(login),
                ATTR_DISPLAY_NAME,
            )
            .await
        {
            Ok(name) => Some(name),
            Err(err) => {
                warn!(user = login, "failed to get displayName attr: {err}");
                None
            }
        };
        session.close().await;

        Ok(UserIdentity {
            account: login.to_string(),
            display_name,
        })
    }

    #[instrument(skip(self))]
    async fn qr_account(&self, account: &str) -> Result<String, LdapError> {
        let mut session = self.qr_session().await?;
        let result = session
            .get_attr(
                &self.qr_domain.base_dn,
                &qr_account_filter(account),
                ATTR_SAM_ACCOUNT_NAME,
            )
            .await;
        session.close().await;
        result
    }

    async fn ping(&self) -> Result<(), LdapError> {
        let session = self.qr_session().await?;
        session.close().await;
        Ok(())
    }
}
