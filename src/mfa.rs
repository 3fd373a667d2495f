//! Optional second factor checked against a privacyIDEA server.
//!
//! The check takes three calls: an admin token from `/auth`, the user's token
//! serial from `/token/`, and finally `/validate/check` with the OTP.

use crate::APP_USER_AGENT;
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("privacyIDEA request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("privacyIDEA {endpoint} returned {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("privacyIDEA {endpoint} response has no {field}")]
    Response {
        endpoint: &'static str,
        field: &'static str,
    },
    #[error("no privacyIDEA token found for {0}")]
    NoToken(String),
    #[error("invalid privacyIDEA URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait SecondFactor: Send + Sync {
    /// Validate `otp` for `user`. `Ok(false)` means the OTP was rejected.
    async fn verify(&self, user: &str, otp: &str) -> Result<bool, MfaError>;
}

#[derive(Debug, Clone)]
pub struct PrivacyIdeaConfig {
    pub url: String,
    pub realm: String,
    pub api_user: String,
    pub api_password: SecretString,
    pub insecure: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PrivacyIdea {
    client: Client,
    base: String,
    realm: String,
    api_user: String,
    api_password: SecretString,
}

impl PrivacyIdea {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(config: PrivacyIdeaConfig) -> Result<Self, MfaError> {
        let url = Url::parse(&config.url)?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            realm: config.realm,
            api_user: config.api_user,
            api_password: config.api_password,
        })
    }

    async fn api_token(&self) -> Result<String, MfaError> {
        let body = self
            .call(
                "/auth",
                self.client.post(format!("{}/auth", self.base)).form(&[
                    ("username", self.api_user.as_str()),
                    ("password", self.api_password.expose_secret()),
                ]),
            )
            .await?;

        body["result"]["value"]["token"]
            .as_str()
            .map(ToString::to_string)
            .ok_or(MfaError::Response {
                endpoint: "/auth",
                field: "result.value.token",
            })
    }

    async fn token_serial(&self, token: &str, user: &str) -> Result<String, MfaError> {
        let body = self
            .call(
                "/token/",
                self.client
                    .get(format!("{}/token/", self.base))
                    .header(AUTHORIZATION, token)
                    .query(&[("user", user), ("realm", self.realm.as_str())]),
            )
            .await?;

        let tokens = body["result"]["value"]["tokens"]
            .as_array()
            .ok_or(MfaError::Response {
                endpoint: "/token/",
                field: "result.value.tokens",
            })?;

        tokens
            .first()
            .and_then(|token| token["serial"].as_str())
            .map(ToString::to_string)
            .ok_or_else(|| MfaError::NoToken(user.to_string()))
    }

    async fn validate(
        &self,
        token: &str,
        user: &str,
        serial: &str,
        otp: &str,
    ) -> Result<bool, MfaError> {
        let body = self
            .call(
                "/validate/check",
                self.client
                    .post(format!("{}/validate/check", self.base))
                    .header(AUTHORIZATION, token)
                    .form(&[
                        ("user", user),
                        ("realm", self.realm.as_str()),
                        ("serial", serial),
                        ("pass", otp),
                    ]),
            )
            .await?;

        body["result"]["value"]
            .as_bool()
            .ok_or(MfaError::Response {
                endpoint: "/validate/check",
                field: "result.value",
            })
    }

    async fn call(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, MfaError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MfaError::Status { endpoint, status });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SecondFactor for PrivacyIdea {
    #[instrument(skip(self, otp))]
    async fn verify(&self, user: &str, otp: &str) -> Result<bool, MfaError> {
        let token = self.api_token().await?;
        let serial = self.token_serial(&token, user).await?;
        debug!(user, serial, "validating OTP");
        self.validate(&token, user, &serial, otp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::HeaderMap,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    const ADMIN_TOKEN: &str = "admin-jwt";

    async fn fake_privacyidea() -> String {
        let app = Router::new()
            .route(
                "/auth",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    if form.get("username").map(String::as_str) == Some("api")
                        && form.get("password").map(String::as_str) == Some("api-pass")
                    {
                        (
                            StatusCode::OK,
                            Json(json!({"result": {"status": true, "value": {"token": ADMIN_TOKEN}}})),
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"result": {"status": false}})),
                        )
                    }
                }),
            )
            .route(
                "/token/",
                get(
                    |headers: HeaderMap, Query(query): Query<HashMap<String, String>>| async move {
                        assert_eq!(
                            headers.get("authorization").and_then(|v| v.to_str().ok()),
                            Some(ADMIN_TOKEN)
                        );
                        assert_eq!(query.get("realm").map(String::as_str), Some("corp.example.com"));
                        let tokens = if query.get("user").map(String::as_str) == Some("jdoe") {
                            json!([{"serial": "TOTP0001"}])
                        } else {
                            json!([])
                        };
                        Json(json!({"result": {"status": true, "value": {"tokens": tokens}}}))
                    },
                ),
            )
            .route(
                "/validate/check",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    let ok = form.get("serial").map(String::as_str) == Some("TOTP0001")
                        && form.get("pass").map(String::as_str) == Some("123456");
                    Json(json!({"result": {"status": true, "value": ok}}))
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        format!("http://{addr}/")
    }

    fn client(url: String, api_password: &str) -> PrivacyIdea {
        PrivacyIdea::new(PrivacyIdeaConfig {
            url,
            realm: "corp.example.com".to_string(),
            api_user: "api".to_string(),
            api_password: SecretString::from(api_password),
            insecure: false,
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn accepts_valid_otp() {
        let pidea = client(fake_privacyidea().await, "api-pass");
        assert!(pidea.verify("jdoe", "123456").await.expect("verify"));
    }

    #[tokio::test]
    async fn rejects_wrong_otp() {
        let pidea = client(fake_privacyidea().await, "api-pass");
        assert!(!pidea.verify("jdoe", "654321").await.expect("verify"));
    }

    #[tokio::test]
    async fn user_without_token() {
        let pidea = client(fake_privacyidea().await, "api-pass");
        assert!(matches!(
            pidea.verify("nobody", "123456").await,
            Err(MfaError::NoToken(ref user)) if user == "nobody"
        ));
    }

    #[tokio::test]
    async fn bad_api_credentials() {
        let pidea = client(fake_privacyidea().await, "wrong");
        match pidea.verify("jdoe", "123456").await {
            Err(MfaError::Status { endpoint, status }) => {
                assert_eq!(endpoint, "/auth");
                assert_eq!(status, StatusCode::UNAUTHORIZED);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_url() {
        let result = PrivacyIdea::new(PrivacyIdeaConfig {
            url: "not a url".to_string(),
            realm: String::new(),
            api_user: String::new(),
            api_password: SecretString::from(""),
            insecure: true,
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(MfaError::Url(_))));
    }
}
