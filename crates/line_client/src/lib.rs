//! LINE Login (OAuth 2.1 / OpenID) client: authorize URL, code exchange and
//! profile lookup. Session handling lives with the HTTP layer.

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, LineError>;

pub const AUTHORIZE_URL: &str = "https://access.line.me/oauth2/v2.1/authorize";
pub const TOKEN_URL: &str = "https://api.line.me/oauth2/v2.1/token";
pub const PROFILE_URL: &str = "https://api.line.me/v2/profile";

#[derive(Debug, Error)]
pub enum LineError {
    #[error("Invalid LINE endpoint URL '{0}'")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Failed to get user info: {0}")]
    Profile(String),
}

#[derive(Debug, Clone)]
pub struct LineClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub timeout: Duration,
}

impl LineClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec!["profile".to_string(), "openid".to_string()],
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            profile_url: PROFILE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// User info returned by the profile endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct LineClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    authorize_url: Url,
    token_url: Url,
    profile_url: Url,
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|_| LineError::InvalidUrl(raw.to_string()))
}

impl LineClient {
    pub fn new(config: LineClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LineError::Client)?;

        Ok(Self {
            http,
            authorize_url: parse_url(&config.authorize_url)?,
            token_url: parse_url(&config.token_url)?,
            profile_url: parse_url(&config.profile_url)?,
            scope: config.scopes.join(" "),
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
        })
    }

    /// URL the browser is redirected to for login, carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state)
            .append_pair("scope", &self.scope);
        url
    }

    /// Trades an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| LineError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(LineError::TokenExchange(format!("{status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LineError::TokenExchange(e.to_string()))?;
        debug!("Exchanged LINE authorization code for access token");
        Ok(token.access_token)
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<LineProfile> {
        let response = self
            .http
            .get(self.profile_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| LineError::Profile(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LineError::Profile(format!("{status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LineError::Profile(e.to_string()))
    }
}
