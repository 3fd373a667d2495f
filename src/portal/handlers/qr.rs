use super::{bad_request, html, page, server_error};
use crate::{
    multiotp::MultiOtpError,
    portal::{forms::CsrfToken, session::Session, templates, PortalState, LOGIN_PATH, VIEW_PATH},
    qr::totp_svg,
};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Show the user's QR code. Any failure along the way renders the page
/// without a code instead of an error.
pub async fn view(
    Extension(state): Extension<Arc<PortalState>>,
    Extension(session): Extension<Session>,
) -> Response {
    let Some(user) = session.user() else {
        return Redirect::to(LOGIN_PATH).into_response();
    };

    let qr_svg = user_qr_svg(&state, &session, &user.account).await;
    let can_reissue = session.qr_account().is_some();

    let page = page(&state, &session);
    match templates::qr_view(&page, user.name(), qr_svg.as_deref(), can_reissue) {
        Ok(body) => html(StatusCode::OK, body),
        Err(err) => server_error(&err),
    }
}

async fn user_qr_svg(state: &PortalState, session: &Session, account: &str) -> Option<String> {
    let qr_account = match state.directory().qr_account(account).await {
        Ok(qr_account) => qr_account,
        Err(err) => {
            error!(user = account, "failed to resolve QR account: {err}");
            return None;
        }
    };
    session.set_qr_account(qr_account.clone());

    let url = match state.multiotp().url_link(&qr_account).await {
        Ok(url) => url,
        Err(err @ MultiOtpError::UserNotFound(_)) => {
            warn!(user = account, qr_account = %qr_account, "{err}");
            return None;
        }
        Err(err) => {
            error!(user = account, qr_account = %qr_account, "failed to get OTP URL: {err}");
            return None;
        }
    };

    match totp_svg(&url) {
        Ok(svg) => Some(svg),
        Err(err) => {
            error!(user = account, "failed to render QR code: {err}");
            None
        }
    }
}

/// Delete the user's token and resync so multiOTP issues a new seed.
pub async fn reissue(
    Extension(state): Extension<Arc<PortalState>>,
    Extension(session): Extension<Session>,
    Query(query): Query<CsrfToken>,
) -> Response {
    let user = session.user().map(|user| user.account).unwrap_or_default();

    if !session.verify_csrf(&query.csrf_token) {
        warn!(user = %user, "CSRF token mismatch on reissue");
        return bad_request("Invalid CSRF token");
    }

    let messages = state.lang().messages();

    let Some(qr_account) = session.qr_account() else {
        warn!(user = %user, "no QR account in session, nothing to reissue");
        session.set_flash(messages.qr_not_reissued);
        return Redirect::to(VIEW_PATH).into_response();
    };

    match state.multiotp().reissue(&qr_account).await {
        Ok(outcome) => {
            info!(user = %user, qr_account = %qr_account, ?outcome, "QR reissued");
            session.set_flash(messages.qr_reissued);
        }
        Err(err) => {
            error!(user = %user, qr_account = %qr_account, "failed to reissue QR: {err}");
            session.set_flash(messages.qr_not_reissued);
        }
    }

    Redirect::to(VIEW_PATH).into_response()
}
