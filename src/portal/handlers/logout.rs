use super::{bad_request, server_error};
use crate::portal::{forms::CsrfToken, session::Session, PortalState};
use axum::{
    extract::{Extension, Form},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn logout(
    Extension(state): Extension<Arc<PortalState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<CsrfToken>,
) -> Response {
    let user = session.user().map(|user| user.account).unwrap_or_default();

    if !session.verify_csrf(&form.csrf_token) {
        warn!(user = %user, "CSRF token mismatch on logout");
        return bad_request("Invalid CSRF token");
    }

    if let Err(err) = session.renew(state.sessions().ttl()) {
        return server_error(&err);
    }
    session.logout();
    session.set_flash(state.lang().messages().logged_out);

    info!(user = %user, "user logged out");

    Redirect::to("/").into_response()
}
