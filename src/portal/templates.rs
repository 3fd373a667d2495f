//! HTML pages rendered with Tera. The templates are compiled into the binary
//! and autoescaped; only the generated QR SVG is marked `safe`.

use super::{
    forms::{FormErrors, LoginForm},
    i18n::Lang,
};
use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use tera::{Context, Tera};

const BASE: &str = include_str!("../../templates/base.html");
const LOGIN: &str = include_str!("../../templates/login.html");
const VIEW: &str = include_str!("../../templates/view.html");

static TEMPLATES: OnceLock<Result<Tera, String>> = OnceLock::new();

/// Data shared by every page.
#[derive(Debug, Clone)]
pub struct Page {
    pub lang: Lang,
    pub current_year: i32,
    pub flash: Option<String>,
    pub is_authenticated: bool,
    pub csrf_token: String,
}

impl Page {
    fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("lang", self.lang.code());
        context.insert("m", self.lang.messages());
        context.insert("current_year", &self.current_year);
        context.insert("flash", &self.flash);
        context.insert("is_authenticated", &self.is_authenticated);
        context.insert("csrf_token", &self.csrf_token);
        context
    }
}

fn templates() -> Result<&'static Tera> {
    TEMPLATES
        .get_or_init(|| {
            let mut tera = Tera::default();
            tera.add_raw_templates(vec![
                ("base.html", BASE),
                ("login.html", LOGIN),
                ("view.html", VIEW),
            ])
            .map(|()| tera)
            .map_err(|err| format!("{err:?}"))
        })
        .as_ref()
        .map_err(|err| anyhow!("failed to load page templates: {err}"))
}

/// # Errors
/// Returns an error if the template fails to render.
pub fn login(
    page: &Page,
    form: &LoginForm,
    errors: &FormErrors,
    mfa_enabled: bool,
) -> Result<String> {
    let mut context = page.context();
    // the password is never echoed back
    context.insert("login", &form.login);
    context.insert("errors", errors.fields());
    context.insert("non_field_errors", errors.non_field());
    context.insert("mfa_enabled", &mfa_enabled);

    Ok(templates()?.render("login.html", &context)?)
}

/// `can_reissue` shows the reissue link; it is independent of `qr_svg` so a
/// user whose token is gone can still ask for a new one.
///
/// # Errors
/// Returns an error if the template fails to render.
pub fn qr_view(
    page: &Page,
    username: &str,
    qr_svg: Option<&str>,
    can_reissue: bool,
) -> Result<String> {
    let mut context = page.context();
    context.insert("username", username);
    context.insert("qr_svg", &qr_svg);
    context.insert("can_reissue", &can_reissue);

    Ok(templates()?.render("view.html", &context)?)
}
