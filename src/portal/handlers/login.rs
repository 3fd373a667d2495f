use super::{bad_request, html, page, server_error};
use crate::portal::{
    forms::{not_blank, valid_login, valid_otp, FormErrors, LoginForm, FIELD_LOGIN, FIELD_OTP, FIELD_PASSWORD},
    session::Session,
    templates, PortalState, VIEW_PATH,
};
use axum::{
    extract::{Extension, Form},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, warn};

pub async fn form(
    Extension(state): Extension<Arc<PortalState>>,
    Extension(session): Extension<Session>,
) -> Response {
    if session.is_authenticated() {
        return Redirect::to(VIEW_PATH).into_response();
    }

    render(
        &state,
        &session,
        StatusCode::OK,
        &LoginForm::default(),
        &FormErrors::default(),
    )
}

/// Validate the form, bind to LDAP as the user, check the OTP when a second
/// factor is configured and promote the session.
pub async fn submit(
    Extension(state): Extension<Arc<PortalState>>,
    Extension(session): Extension<Session>,
    Form(mut form): Form<LoginForm>,
) -> Response {
    if !session.verify_csrf(&form.csrf_token) {
        warn!(login = %form.login, "CSRF token mismatch on login");
        return bad_request("Invalid CSRF token");
    }

    let messages = state.lang().messages();
    let second_factor = state.second_factor();

    let mut errors = FormErrors::default();
    errors.check_field(not_blank(&form.login), FIELD_LOGIN, messages.blank_field);
    errors.check_field(valid_login(&form.login), FIELD_LOGIN, messages.invalid_login);
    errors.check_field(not_blank(&form.password), FIELD_PASSWORD, messages.blank_field);
    if second_factor.is_some() {
        errors.check_field(not_blank(&form.otp), FIELD_OTP, messages.blank_field);
        errors.check_field(valid_otp(&form.otp), FIELD_OTP, messages.invalid_otp);
    }

    if !errors.is_valid() {
        return render(&state, &session, StatusCode::UNPROCESSABLE_ENTITY, &form, &errors);
    }

    let password = SecretString::from(std::mem::take(&mut form.password));

    let identity = match state.directory().authenticate(&form.login, &password).await {
        Ok(identity) => identity,
        Err(err) if err.is_invalid_credentials() => {
            warn!(login = %form.login, "LDAP bind failed: {err}");
            errors.check_field(false, FIELD_LOGIN, messages.wrong_credentials);
            return render(&state, &session, StatusCode::UNPROCESSABLE_ENTITY, &form, &errors);
        }
        Err(err) => {
            error!(login = %form.login, "LDAP authentication failed: {err}");
            errors.add_non_field(messages.directory_unavailable);
            return render(&state, &session, StatusCode::UNPROCESSABLE_ENTITY, &form, &errors);
        }
    };

    if let Some(second_factor) = second_factor {
        let accepted = match second_factor.verify(&identity.account, &form.otp).await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(login = %form.login, "OTP validation failed: {err}");
                false
            }
        };

        if !accepted {
            warn!(login = %form.login, "wrong OTP");
            errors.check_field(false, FIELD_OTP, messages.wrong_otp);
            return render(&state, &session, StatusCode::UNPROCESSABLE_ENTITY, &form, &errors);
        }
    }

    if let Err(err) = session.renew(state.sessions().ttl()) {
        return server_error(&err);
    }

    info!(user = %identity.account, "user logged in");
    session.login(identity);

    Redirect::to(VIEW_PATH).into_response()
}

fn render(
    state: &PortalState,
    session: &Session,
    status: StatusCode,
    form: &LoginForm,
    errors: &FormErrors,
) -> Response {
    let page = page(state, session);
    match templates::login(&page, form, errors, state.second_factor().is_some()) {
        Ok(body) => html(status, body),
        Err(err) => server_error(&err),
    }
}
