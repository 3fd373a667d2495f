pub mod assets;
pub use self::assets::stylesheet;

pub mod health;
pub use self::health::health;

pub mod login;

pub mod logout;
pub use self::logout::logout;

pub mod qr;

pub mod root;
pub use self::root::root;

use super::{session::Session, templates::Page, PortalState};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::{Datelike, Local};
use tracing::error;

/// Common page data; pops the pending flash message.
fn page(state: &PortalState, session: &Session) -> Page {
    Page {
        lang: state.lang(),
        current_year: Local::now().year(),
        flash: session.pop_flash(),
        is_authenticated: session.is_authenticated(),
        csrf_token: session.csrf_token(),
    }
}

fn html(status: StatusCode, body: String) -> Response {
    (status, Html(body)).into_response()
}

fn server_error(err: &anyhow::Error) -> Response {
    error!("Internal server error: {err:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, reason.to_string()).into_response()
}
