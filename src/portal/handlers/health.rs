//! Health probe: build info plus the state of the directory and multiOTP.

use crate::{ldap::Directory, portal::PortalState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::Mutex,
    time::{timeout, Duration},
};
use tracing::{debug, error, warn};

const HEALTH_LDAP_TIMEOUT_SECONDS: u64 = 5;
const HEALTH_LDAP_CACHE_SECONDS: u64 = 10;

/// Last directory probe result. Concurrent callers wait for one probe
/// instead of each binding to the directory.
#[derive(Debug, Default)]
pub struct DirectoryProbe {
    last: Mutex<Option<(Instant, bool)>>,
}

impl DirectoryProbe {
    pub async fn check(&self, directory: &dyn Directory) -> bool {
        let mut last = self.last.lock().await;
        if let Some((checked_at, ok)) = *last {
            if checked_at.elapsed() < Duration::from_secs(HEALTH_LDAP_CACHE_SECONDS) {
                return ok;
            }
        }

        let ok = probe_directory(directory).await;
        *last = Some((Instant::now(), ok));
        ok
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    directory: String,
    multiotp: String,
}

/// Report 200 when the user directory answers and the multiOTP binary is
/// installed, 503 otherwise. `HEAD` gets the headers only.
pub async fn health(
    method: Method,
    Extension(state): Extension<Arc<PortalState>>,
) -> impl IntoResponse {
    let directory_ok = state.directory_probe().check(state.directory()).await;
    let multiotp_ok = state.multiotp().is_installed();
    if !multiotp_ok {
        error!(
            "multiotp binary not found: {}",
            state.multiotp().bin().display()
        );
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        directory: status(directory_ok),
        multiotp: status(multiotp_ok),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if directory_ok && multiotp_ok {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_directory(directory: &dyn Directory) -> bool {
    match timeout(
        Duration::from_secs(HEALTH_LDAP_TIMEOUT_SECONDS),
        directory.ping(),
    )
    .await
    {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Failed to reach the user directory: {err}");
            false
        }
        Err(_) => {
            warn!("Directory health check timed out");
            false
        }
    }
}

fn status(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}
