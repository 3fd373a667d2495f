//! Form payloads and their validation.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

// sAMAccountName-like: no spaces, no leading punctuation
const LOGIN_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$";
const OTP_PATTERN: &str = r"^[0-9]{6}$";

pub const FIELD_LOGIN: &str = "login";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_OTP: &str = "otp";

#[derive(Deserialize, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub otp: String,
    #[serde(default)]
    pub csrf_token: String,
}

// Hand-written so the password never reaches the logs.
impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("login", &self.login)
            .field("password", &"[redacted]")
            .field("otp", &"[redacted]")
            .finish_non_exhaustive()
    }
}

/// Body of the logout form and query of the reissue link.
#[derive(Debug, Deserialize, Default)]
pub struct CsrfToken {
    #[serde(default)]
    pub csrf_token: String,
}

/// Validation errors, at most one per field plus page-level errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeMap<&'static str, &'static str>,
    non_field: Vec<&'static str>,
}

impl FormErrors {
    /// Record `message` for `field` unless `ok`; the first error per field wins.
    pub fn check_field(&mut self, ok: bool, field: &'static str, message: &'static str) {
        if !ok {
            self.fields.entry(field).or_insert(message);
        }
    }

    pub fn add_non_field(&mut self, message: &'static str) {
        self.non_field.push(message);
    }

    #[must_use]
    pub fn field(&self, field: &str) -> Option<&'static str> {
        self.fields.get(field).copied()
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<&'static str, &'static str> {
        &self.fields
    }

    #[must_use]
    pub fn non_field(&self) -> &[&'static str] {
        &self.non_field
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.fields.is_empty() && self.non_field.is_empty()
    }
}

#[must_use]
pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

#[must_use]
pub fn valid_login(login: &str) -> bool {
    Regex::new(LOGIN_PATTERN).is_ok_and(|re| re.is_match(login))
}

#[must_use]
pub fn valid_otp(otp: &str) -> bool {
    Regex::new(OTP_PATTERN).is_ok_and(|re| re.is_match(otp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_validation() {
        assert!(valid_login("jdoe"));
        assert!(valid_login("john.doe-2"));
        assert!(valid_login("J_Doe"));
        assert!(!valid_login(""));
        assert!(!valid_login("-delete"));
        assert!(!valid_login("john doe"));
        assert!(!valid_login("jdoe@corp.example.com"));
        assert!(!valid_login("a*)(uid=*"));
        assert!(!valid_login(&"a".repeat(65)));
    }

    #[test]
    fn otp_validation() {
        assert!(valid_otp("012345"));
        assert!(!valid_otp("12345"));
        assert!(!valid_otp("1234567"));
        assert!(!valid_otp("12a456"));
    }

    #[test]
    fn first_error_per_field_wins() {
        let mut errors = FormErrors::default();
        assert!(errors.is_valid());

        errors.check_field(false, FIELD_LOGIN, "blank");
        errors.check_field(false, FIELD_LOGIN, "invalid");
        errors.check_field(true, FIELD_PASSWORD, "blank");

        assert!(!errors.is_valid());
        assert_eq!(errors.field(FIELD_LOGIN), Some("blank"));
        assert_eq!(errors.field(FIELD_PASSWORD), None);
    }

    #[test]
    fn non_field_errors_invalidate() {
        let mut errors = FormErrors::default();
        errors.add_non_field("down");
        assert!(!errors.is_valid());
        assert_eq!(errors.non_field(), ["down"]);
    }

    #[test]
    fn debug_redacts_secrets() {
        let form = LoginForm {
            login: "jdoe".to_string(),
            password: "hunter2".to_string(),
            otp: "123456".to_string(),
            csrf_token: String::new(),
        };
        let debug = format!("{form:?}");
        assert!(debug.contains("jdoe"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("123456"));
    }
}
