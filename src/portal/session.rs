//! Server-side sessions kept in memory.
//!
//! The browser only holds a random token in the `otp_portal_session` cookie;
//! the store is keyed by the SHA-256 of that token so raw tokens are never
//! kept server-side. Each session owns a CSRF token which every form posts
//! back. Sessions live for a fixed lifetime from creation (or from the last
//! token renewal) and are swept by a background task.
//!
//! A new visitor's session is only stored, and only gets a cookie, once it
//! carries something: a rendered CSRF token, a flash message or a login.
//! Anonymous sessions expire after [`ANONYMOUS_SESSION_TTL`] at most and
//! their number is capped; at the cap the one closest to expiry is dropped.

use super::PortalState;
use crate::ldap::UserIdentity;
use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Request},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::time::interval;
use tracing::{debug, error};

pub const SESSION_COOKIE_NAME: &str = "otp_portal_session";
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;
pub const ANONYMOUS_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_ANONYMOUS_SESSIONS: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub user: Option<UserIdentity>,
    /// Account name resolved in the QR domain, needed to reissue.
    pub qr_account: Option<String>,
    pub flash: Option<String>,
    pub csrf_token: String,
}

#[derive(Debug)]
struct StoredSession {
    data: SessionData,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    max_anonymous: usize,
    sessions: Mutex<HashMap<Vec<u8>, StoredSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_anonymous: DEFAULT_MAX_ANONYMOUS_SESSIONS,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_max_anonymous(mut self, max_anonymous: usize) -> Self {
        self.max_anonymous = max_anonymous.max(1);
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, StoredSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a live session. Expired sessions are removed and reported as missing.
    #[must_use]
    pub fn load(&self, token: &str) -> Option<(SessionData, Instant)> {
        let key = hash_session_token(token);
        let mut sessions = self.lock();
        match sessions.get(&key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                Some((stored.data.clone(), stored.expires_at))
            }
            Some(_) => {
                sessions.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn save(&self, token: &str, data: SessionData, expires_at: Instant) {
        let key = hash_session_token(token);
        let mut sessions = self.lock();
        if data.user.is_none() && !sessions.contains_key(&key) {
            self.make_room_for_anonymous(&mut sessions);
        }
        sessions.insert(key, StoredSession { data, expires_at });
    }

    fn make_room_for_anonymous(&self, sessions: &mut HashMap<Vec<u8>, StoredSession>) {
        // fewer sessions in total than the cap, so fewer anonymous ones too
        if sessions.len() < self.max_anonymous {
            return;
        }

        let now = Instant::now();
        sessions.retain(|_, stored| stored.expires_at > now);

        let anonymous = sessions
            .values()
            .filter(|stored| stored.data.user.is_none())
            .count();
        if anonymous < self.max_anonymous {
            return;
        }

        let oldest = sessions
            .iter()
            .filter(|(_, stored)| stored.data.user.is_none())
            .min_by_key(|(_, stored)| stored.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            sessions.remove(&key);
            debug!(max = self.max_anonymous, "anonymous session limit reached, dropped the oldest");
        }
    }

    pub fn remove(&self, token: &str) {
        self.lock().remove(&hash_session_token(token));
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        before - sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically sweep expired sessions.
pub fn spawn_purge_task(store: Arc<SessionStore>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged, "expired sessions removed");
            }
        }
    });
}

#[derive(Debug)]
struct SessionState {
    token: String,
    stale_token: Option<String>,
    data: SessionData,
    expires_at: Instant,
    is_new: bool,
    modified: bool,
}

/// Per-request handle to the caller's session, inserted by [`load_and_save`].
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    fn existing(token: String, data: SessionData, expires_at: Instant) -> Self {
        Self::from_state(SessionState {
            token,
            stale_token: None,
            data,
            expires_at,
            is_new: false,
            modified: false,
        })
    }

    /// A brand new anonymous session, not stored until it is modified.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn fresh(ttl: Duration) -> Result<Self> {
        Ok(Self::from_state(SessionState {
            token: generate_token()?,
            stale_token: None,
            data: SessionData {
                csrf_token: generate_token()?,
                ..SessionData::default()
            },
            expires_at: Instant::now() + ttl.min(ANONYMOUS_SESSION_TTL),
            is_new: true,
            modified: false,
        }))
    }

    fn from_state(state: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn user(&self) -> Option<UserIdentity> {
        self.lock().data.user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().data.user.is_some()
    }

    /// The CSRF token to render in a form. Rendering it is what makes a new
    /// session worth storing, since the form post has to find it again.
    #[must_use]
    pub fn csrf_token(&self) -> String {
        let mut state = self.lock();
        if state.is_new {
            state.modified = true;
        }
        state.data.csrf_token.clone()
    }

    /// Compare a submitted CSRF token with the session's.
    #[must_use]
    pub fn verify_csrf(&self, submitted: &str) -> bool {
        let state = self.lock();
        !state.data.csrf_token.is_empty()
            && constant_time_eq(state.data.csrf_token.as_bytes(), submitted.as_bytes())
    }

    #[must_use]
    pub fn qr_account(&self) -> Option<String> {
        self.lock().data.qr_account.clone()
    }

    pub fn set_qr_account(&self, account: String) {
        let mut state = self.lock();
        if state.data.qr_account.as_deref() != Some(account.as_str()) {
            state.data.qr_account = Some(account);
            state.modified = true;
        }
    }

    pub fn set_flash(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.data.flash = Some(message.into());
        state.modified = true;
    }

    /// Take the flash message; it is shown once.
    #[must_use]
    pub fn pop_flash(&self) -> Option<String> {
        let mut state = self.lock();
        let flash = state.data.flash.take();
        if flash.is_some() {
            state.modified = true;
        }
        flash
    }

    /// Swap the session token and CSRF token, keeping the data. Called on
    /// every privilege change so a token planted before login is useless.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn renew(&self, ttl: Duration) -> Result<()> {
        let token = generate_token()?;
        let csrf_token = generate_token()?;

        let mut state = self.lock();
        let old = std::mem::replace(&mut state.token, token);
        if !state.is_new && state.stale_token.is_none() {
            state.stale_token = Some(old);
        }
        state.data.csrf_token = csrf_token;
        state.expires_at = Instant::now() + ttl;
        state.modified = true;
        Ok(())
    }

    pub fn login(&self, user: UserIdentity) {
        let mut state = self.lock();
        state.data.user = Some(user);
        state.data.qr_account = None;
        state.modified = true;
    }

    pub fn logout(&self) {
        let mut state = self.lock();
        state.data.user = None;
        state.data.qr_account = None;
        state.modified = true;
    }

    /// Persist changes and emit the cookie when the token changed.
    fn commit(&self, store: &SessionStore, secure: bool, headers: &mut HeaderMap) {
        let state = self.lock();

        if let Some(stale) = &state.stale_token {
            store.remove(stale);
        }
        if state.modified {
            store.save(&state.token, state.data.clone(), state.expires_at);
        }
        if (state.is_new && state.modified) || state.stale_token.is_some() {
            let max_age = state
                .expires_at
                .saturating_duration_since(Instant::now())
                .as_secs();
            match session_cookie(&state.token, max_age, secure) {
                Ok(cookie) => {
                    headers.append(SET_COOKIE, cookie);
                }
                Err(err) => error!("Failed to build session cookie: {err}"),
            }
        }
    }
}

/// Middleware: load the caller's session (or start one), expose it to
/// handlers as an `Extension<Session>`, then persist it.
pub async fn load_and_save(
    Extension(state): Extension<Arc<PortalState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let store = state.sessions();

    let existing = extract_session_token(request.headers()).and_then(|token| {
        store
            .load(&token)
            .map(|(data, expires_at)| Session::existing(token, data, expires_at))
    });

    let session = match existing {
        Some(session) => session,
        None => match Session::fresh(store.ttl()) {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to start session: {err:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
    };

    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;
    session.commit(store, state.secure_cookies(), response.headers_mut());
    response
}

fn session_cookie(
    token: &str,
    max_age: u64,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
                .then(|| val.trim().to_string())
        })
}

/// Random 32-byte token, base64url encoded.
fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UserIdentity {
        UserIdentity {
            account: "jdoe".to_string(),
            display_name: Some("John Doe".to_string()),
        }
    }

    fn token_of(session: &Session) -> String {
        session.lock().token.clone()
    }

    #[test]
    fn generated_tokens_are_unique_and_url_safe() {
        let a = generate_token().expect("token");
        let b = generate_token().expect("token");
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn store_never_keeps_raw_tokens() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.save(
            "raw-token",
            SessionData::default(),
            Instant::now() + Duration::from_secs(60),
        );
        let sessions = store.lock();
        assert!(!sessions.contains_key(b"raw-token".as_slice()));
        assert!(sessions.contains_key(&hash_session_token("raw-token")));
    }

    #[test]
    fn expired_sessions_are_not_loaded() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.save("old", SessionData::default(), Instant::now());
        store.save(
            "live",
            SessionData::default(),
            Instant::now() + Duration::from_secs(60),
        );

        assert!(store.load("old").is_none());
        assert!(store.load("live").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.save("a", SessionData::default(), Instant::now());
        store.save("b", SessionData::default(), Instant::now());
        store.save(
            "c",
            SessionData::default(),
            Instant::now() + Duration::from_secs(60),
        );

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn flash_is_shown_once() {
        let session = Session::fresh(Duration::from_secs(60)).expect("session");
        session.set_flash("hello");
        assert_eq!(session.pop_flash().as_deref(), Some("hello"));
        assert_eq!(session.pop_flash(), None);
    }

    #[test]
    fn csrf_check() {
        let session = Session::fresh(Duration::from_secs(60)).expect("session");
        let token = session.csrf_token();
        assert!(session.verify_csrf(&token));
        assert!(!session.verify_csrf(""));
        assert!(!session.verify_csrf("forged"));
    }

    #[test]
    fn renew_rotates_tokens_and_drops_old_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let expires_at = Instant::now() + Duration::from_secs(60);
        store.save(
            "before",
            SessionData {
                csrf_token: "csrf-before".to_string(),
                ..SessionData::default()
            },
            expires_at,
        );

        let (data, expires_at) = store.load("before").expect("session");
        let session = Session::existing("before".to_string(), data, expires_at);
        session.renew(store.ttl()).expect("renew");
        session.login(identity());

        let mut headers = HeaderMap::new();
        session.commit(&store, true, &mut headers);

        let new_token = token_of(&session);
        assert_ne!(new_token, "before");
        assert!(store.load("before").is_none());

        let (data, _) = store.load(&new_token).expect("renewed session");
        assert_eq!(data.user, Some(identity()));
        assert_ne!(data.csrf_token, "csrf-before");

        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .expect("cookie");
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE_NAME}={new_token};")));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn unchanged_session_sets_no_cookie() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = Session::existing(
            "token".to_string(),
            SessionData::default(),
            Instant::now() + Duration::from_secs(60),
        );

        let mut headers = HeaderMap::new();
        session.commit(&store, false, &mut headers);
        assert!(headers.get(SET_COOKIE).is_none());
        // nothing modified, nothing written
        assert!(store.is_empty());
    }

    #[test]
    fn untouched_new_session_is_not_stored() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = Session::fresh(store.ttl()).expect("session");

        let mut headers = HeaderMap::new();
        session.commit(&store, false, &mut headers);
        assert!(store.is_empty());
        assert!(headers.get(SET_COOKIE).is_none());
    }

    #[test]
    fn new_session_is_stored_once_csrf_token_is_rendered() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = Session::fresh(store.ttl()).expect("session");
        let csrf = session.csrf_token();

        let mut headers = HeaderMap::new();
        session.commit(&store, false, &mut headers);
        assert!(headers.get(SET_COOKIE).is_some());

        let (data, _) = store.load(&token_of(&session)).expect("stored session");
        assert_eq!(data.csrf_token, csrf);
    }

    #[test]
    fn anonymous_sessions_get_the_short_lifetime() {
        let session = Session::fresh(Duration::from_secs(24 * 60 * 60)).expect("session");
        let expires_in = session
            .lock()
            .expires_at
            .saturating_duration_since(Instant::now());
        assert!(expires_in <= ANONYMOUS_SESSION_TTL);

        // login renews with the full lifetime
        session.renew(Duration::from_secs(24 * 60 * 60)).expect("renew");
        let expires_in = session
            .lock()
            .expires_at
            .saturating_duration_since(Instant::now());
        assert!(expires_in > ANONYMOUS_SESSION_TTL);
    }

    #[test]
    fn anonymous_sessions_are_capped() {
        let store = SessionStore::new(Duration::from_secs(60)).with_max_anonymous(3);
        let now = Instant::now();

        store.save(
            "user",
            SessionData {
                user: Some(identity()),
                ..SessionData::default()
            },
            now + Duration::from_secs(1),
        );
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            let offset = u64::try_from(i).expect("index") + 10;
            store.save(name, SessionData::default(), now + Duration::from_secs(offset));
        }

        // three newest anonymous sessions plus the authenticated one
        assert_eq!(store.len(), 4);
        assert!(store.load("user").is_some());
        assert!(store.load("a").is_none());
        assert!(store.load("b").is_none());
        assert!(store.load("e").is_some());

        // updating a stored session never evicts another
        store.save("e", SessionData::default(), now + Duration::from_secs(30));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn logout_clears_identity() {
        let session = Session::fresh(Duration::from_secs(60)).expect("session");
        session.login(identity());
        session.set_qr_account("corp-jdoe".to_string());
        assert!(session.is_authenticated());

        session.logout();
        assert!(!session.is_authenticated());
        assert_eq!(session.qr_account(), None);
    }

    #[test]
    fn extracts_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; otp_portal_session=abc123; lang=en"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("otp_portal_session="));
        assert_eq!(extract_session_token(&headers), None);
    }
}
