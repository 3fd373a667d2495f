//! The web portal: router, shared state and the HTTP(S) server loop.
//!
//! ## Flow Overview
//! 1) Every request gets an `x-request-id` and a tracing span.
//! 2) Dynamic routes load the caller's session (or start a new one).
//! 3) `/qr/*` and `/user/logout` additionally require an authenticated session.
//! 4) The session is saved and the cookie is (re)issued on the way out.

use crate::{
    ldap::Directory,
    mfa::SecondFactor,
    multiotp::MultiOtp,
    tls::{self, TlsPaths},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, Request},
    http::{
        header::{
            CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
            X_FRAME_OPTIONS, X_XSS_PROTECTION,
        },
        HeaderName, HeaderValue,
    },
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{debug, debug_span, error, info, warn, Span};
use ulid::Ulid;

mod forms;
mod handlers;
pub mod i18n;
pub mod session;
mod templates;

use i18n::Lang;
use session::{Session, SessionStore};

pub const LOGIN_PATH: &str = "/user/login";
pub const VIEW_PATH: &str = "/qr/view";

const REQUEST_ID: &str = "x-request-id";
const CONTENT_SECURITY: &str =
    "default-src 'self'; img-src 'self' data:; style-src 'self'; frame-ancestors 'none'; form-action 'self'";

/// Everything handlers need, shared behind an `Arc` as a request extension.
pub struct PortalState {
    directory: Arc<dyn Directory>,
    multiotp: MultiOtp,
    second_factor: Option<Arc<dyn SecondFactor>>,
    sessions: Arc<SessionStore>,
    lang: Lang,
    secure_cookies: bool,
    directory_probe: handlers::health::DirectoryProbe,
}

impl fmt::Debug for PortalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalState")
            .field("multiotp", &self.multiotp)
            .field("second_factor", &self.second_factor.is_some())
            .field("lang", &self.lang)
            .field("secure_cookies", &self.secure_cookies)
            .finish_non_exhaustive()
    }
}

impl PortalState {
    #[must_use]
    pub fn new(
        directory: Arc<dyn Directory>,
        multiotp: MultiOtp,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            directory,
            multiotp,
            second_factor: None,
            sessions,
            lang: Lang::default(),
            secure_cookies: true,
            directory_probe: handlers::health::DirectoryProbe::default(),
        }
    }

    #[must_use]
    pub fn with_second_factor(mut self, second_factor: Arc<dyn SecondFactor>) -> Self {
        self.second_factor = Some(second_factor);
        self
    }

    #[must_use]
    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn multiotp(&self) -> &MultiOtp {
        &self.multiotp
    }

    #[must_use]
    pub fn second_factor(&self) -> Option<&dyn SecondFactor> {
        self.second_factor.as_deref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn lang(&self) -> Lang {
        self.lang
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    fn directory_probe(&self) -> &handlers::health::DirectoryProbe {
        &self.directory_probe
    }
}

/// Build the portal router with all middleware applied.
#[must_use]
pub fn router(state: Arc<PortalState>) -> Router {
    let protected = Router::new()
        .route(VIEW_PATH, get(handlers::qr::view))
        .route("/qr/reissue", get(handlers::qr::reissue))
        .route("/user/logout", post(handlers::logout))
        .route_layer(middleware::from_fn(require_authentication));

    let dynamic = Router::new()
        .route("/", get(handlers::root))
        .route(
            LOGIN_PATH,
            get(handlers::login::form).post(handlers::login::submit),
        )
        .merge(protected)
        .layer(middleware::from_fn(session::load_and_save));

    Router::new()
        .merge(dynamic)
        .route("/health", get(handlers::health))
        .route("/static/main.css", get(handlers::stylesheet))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CatchPanicLayer::new())
                .layer(SetResponseHeaderLayer::overriding(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(CONTENT_SECURITY),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    REFERRER_POLICY,
                    HeaderValue::from_static("same-origin"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("deny"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_XSS_PROTECTION,
                    HeaderValue::from_static("0"),
                ))
                .layer(Extension(state)),
        )
}

/// Route layer: anonymous sessions are sent to the login page.
async fn require_authentication(request: Request, next: Next) -> Response {
    let authenticated = request
        .extensions()
        .get::<Session>()
        .is_some_and(Session::is_authenticated);

    if !authenticated {
        debug!(path = request.uri().path(), "unauthenticated, redirecting to login");
        return Redirect::to(LOGIN_PATH).into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Serve the portal until SIGINT/SIGTERM, over TLS when `tls` is set.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the TLS material
/// cannot be loaded.
pub async fn new(port: u16, state: PortalState, tls: Option<TlsPaths>) -> Result<()> {
    let sessions = Arc::clone(&state.sessions);
    session::spawn_purge_task(sessions, Duration::from_secs(60));

    let app = router(Arc::new(state));

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    match tls {
        Some(paths) => {
            let config = tls::load_server_config(&paths)?;
            info!("Listening on https://[::]:{}", port);
            serve_tls(listener, TlsAcceptor::from(Arc::new(config)), app).await
        }
        None => {
            warn!("TLS is disabled, session cookies are sent without the Secure flag");
            info!("Listening on http://[::]:{}", port);
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok(())
        }
    }
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("Failed to accept connection: {err}");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%peer, "TLS handshake failed: {err}");
                    return;
                }
            };

            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(app))
                .await
            {
                debug!(%peer, "Error serving connection: {err}");
            }
        });
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = headers
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http.request", method, path, request_id)
}
