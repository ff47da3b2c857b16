//! Startup session check
//!
//! Before going online the daemon can post its token to the workspace's
//! `client.userBoot` endpoint to find out whether the token and cookie are
//! still accepted. Any failure here is fatal: reconnecting with dead
//! credentials would only loop.

use std::time::Duration;

use reqwest::header::COOKIE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::AuthSettings;
use crate::connection::Credentials;
use crate::error::{Error, Result};

/// Body of a `client.userBoot` reply
#[derive(Debug, Clone, Deserialize)]
pub struct UserBootResponse {
    pub ok: bool,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(rename = "self", default)]
    pub user: Option<BootUser>,

    #[serde(default)]
    pub team: Option<BootTeam>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl UserBootResponse {
    /// Best human-readable name for the signed-in user
    pub fn display_name(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.real_name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&u.name))
            .unwrap_or("unknown user")
    }
}

/// Post the credentials to `client.userBoot` and require `ok: true`
pub async fn check_session(settings: &AuthSettings, credentials: &Credentials) -> Result<UserBootResponse> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
        .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;

    debug!(url = %settings.url, "Checking session");

    let response = client
        .post(&settings.url)
        .header(COOKIE, &credentials.cookie)
        .form(&[("token", credentials.token.as_str())])
        .send()
        .await
        .map_err(|e| auth_failed(format!("session check request failed: {}", e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| auth_failed(format!("reading session check response: {}", e)))?;

    let boot: UserBootResponse = serde_json::from_str(&body).map_err(|e| {
        auth_failed(format!("unexpected session check response (HTTP {}): {}", status, e))
    })?;

    if !boot.ok {
        return Err(auth_failed(
            boot.error.clone().unwrap_or_else(|| "unknown_error".to_string()),
        ));
    }

    info!(
        user = boot.display_name(),
        team = boot.team.as_ref().map(|t| t.name.as_str()).unwrap_or(""),
        "Session check passed"
    );
    Ok(boot)
}

fn auth_failed(message: String) -> Error {
    Error::AuthenticationFailed { message }
}
