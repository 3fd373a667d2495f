//! User-facing strings in English and Russian.

use serde::Serialize;
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lang {
    #[default]
    En,
    Ru,
}

impl Lang {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
        }
    }

    #[must_use]
    pub fn messages(self) -> &'static Messages {
        match self {
            Self::En => &EN,
            Self::Ru => &RU,
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Self::En),
            "ru" => Ok(Self::Ru),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// Exposed to page templates as `m`.
#[derive(Debug, Serialize)]
pub struct Messages {
    pub app_title: &'static str,
    pub blank_field: &'static str,
    pub invalid_login: &'static str,
    pub invalid_otp: &'static str,
    pub wrong_credentials: &'static str,
    pub wrong_otp: &'static str,
    pub directory_unavailable: &'static str,
    pub qr_reissued: &'static str,
    pub qr_not_reissued: &'static str,
    pub logged_out: &'static str,
    pub login_title: &'static str,
    pub login_label: &'static str,
    pub password_label: &'static str,
    pub otp_label: &'static str,
    pub login_button: &'static str,
    pub logout_button: &'static str,
    pub view_title: &'static str,
    pub greeting: &'static str,
    pub qr_hint: &'static str,
    pub qr_missing: &'static str,
    pub reissue_link: &'static str,
}

pub static EN: Messages = Messages {
    app_title: "OTP Portal",
    blank_field: "This field cannot be blank",
    invalid_login: "This field must be a valid login",
    invalid_otp: "OTP is not valid",
    wrong_credentials: "Wrong login or password",
    wrong_otp: "Wrong OTP",
    directory_unavailable: "Authentication service is unavailable, try again later",
    qr_reissued: "Your QR has been reissued!",
    qr_not_reissued: "Your QR hasn’t been reissued!",
    logged_out: "You’ve been logged out successfully!",
    login_title: "Login",
    login_label: "Login",
    password_label: "Password",
    otp_label: "OTP",
    login_button: "Login",
    logout_button: "Logout",
    view_title: "Your QR code",
    greeting: "Hello",
    qr_hint: "Scan this code with your authenticator app.",
    qr_missing: "QR code not found. Contact your administrator.",
    reissue_link: "Reissue QR",
};

pub static RU: Messages = Messages {
    app_title: "OTP Портал",
    blank_field: "Это поле не может быть пустым",
    invalid_login: "Логин не валидный",
    invalid_otp: "OTP не валидный",
    wrong_credentials: "Не верный логин или пароль",
    wrong_otp: "Не верный OTP",
    directory_unavailable: "Сервис аутентификации недоступен, попробуйте позже",
    qr_reissued: "Ваш QR перевыпущен!",
    qr_not_reissued: "Ваш QR НЕ перевыпущен!",
    logged_out: "Вы успешно вышли!",
    login_title: "Вход",
    login_label: "Логин",
    password_label: "Пароль",
    otp_label: "OTP",
    login_button: "Войти",
    logout_button: "Выйти",
    view_title: "Ваш QR код",
    greeting: "Здравствуйте",
    qr_hint: "Отсканируйте код в приложении-аутентификаторе.",
    qr_missing: "QR код не найден. Обратитесь к администратору.",
    reissue_link: "Перевыпустить QR",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_codes() {
        assert_eq!("en".parse::<Lang>(), Ok(Lang::En));
        assert_eq!(" RU ".parse::<Lang>(), Ok(Lang::Ru));
        assert!("de".parse::<Lang>().is_err());
    }

    #[test]
    fn tables_differ() {
        assert_ne!(Lang::En.messages().logged_out, Lang::Ru.messages().logged_out);
        assert_eq!(Lang::Ru.to_string(), "ru");
    }
}
