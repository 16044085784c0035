//! Generic OpenID Connect
//!
//! Endpoints come from `{issuer}/.well-known/openid-configuration`, fetched
//! on first use. Only a successful discovery is cached; a failure leaves the
//! cache empty so the next login retries.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use super::{Provider, VerifiedUser, ensure_success};
use crate::config::OidcConfig;
use crate::error::AppError;

const SCOPE: &str = "openid email profile";
const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Endpoints taken from a validated discovery document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OidcUser {
    sub: String,
    email: Option<String>,
    email_verified: Option<Value>,
    name: Option<String>,
    picture: Option<String>,
}

/// `true` only for boolean true or the string "true" (any case).
pub(crate) fn is_email_verified(claim: Option<&Value>) -> bool {
    match claim {
        Some(Value::Bool(verified)) => *verified,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, AppError> {
    field
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Discovery(format!("missing {name}")))
}

pub struct OidcProvider {
    config: OidcConfig,
    client: reqwest::Client,
    endpoints: Mutex<Option<OidcEndpoints>>,
}

impl OidcProvider {
    pub fn new(config: OidcConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            endpoints: Mutex::new(None),
        }
    }

    fn issuer(&self) -> &str {
        self.config.issuer_url.trim_end_matches('/')
    }

    /// Cached endpoints, running discovery if none are cached yet.
    pub async fn endpoints(&self) -> Result<OidcEndpoints, AppError> {
        let mut cached = self.endpoints.lock().await;
        if let Some(endpoints) = cached.as_ref() {
            return Ok(endpoints.clone());
        }

        let endpoints = self.discover().await.inspect_err(|error| {
            tracing::error!(issuer = self.issuer(), %error, "OIDC discovery failed");
        })?;
        tracing::info!(issuer = %endpoints.issuer, "OIDC endpoints discovered");
        *cached = Some(endpoints.clone());
        Ok(endpoints)
    }

    /// Drop cached endpoints; the next call re-runs discovery.
    pub async fn reset_discovery(&self) {
        *self.endpoints.lock().await = None;
    }

    async fn discover(&self) -> Result<OidcEndpoints, AppError> {
        let url = format!("{}{DISCOVERY_PATH}", self.issuer());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Discovery(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Discovery(format!("status {}", status.as_u16())));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AppError::Discovery(format!("invalid document: {e}")))?;

        let authorization_endpoint =
            required(document.authorization_endpoint, "authorization_endpoint")?;
        let token_endpoint = required(document.token_endpoint, "token_endpoint")?;
        let userinfo_endpoint = required(document.userinfo_endpoint, "userinfo_endpoint")?;

        let issuer = document.issuer.unwrap_or_default();
        if issuer.trim_end_matches('/') != self.issuer() {
            return Err(AppError::Discovery(format!(
                "issuer mismatch: expected {}, got {issuer}",
                self.issuer()
            )));
        }

        Ok(OidcEndpoints {
            issuer,
            authorization_endpoint,
            token_endpoint,
            userinfo_endpoint,
        })
    }
}

#[async_trait]
impl Provider for OidcProvider {
    fn name(&self) -> &'static str {
        "oidc"
    }

    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    async fn authorize_url(&self, state: &str, email_hint: Option<&str>) -> Result<String, AppError> {
        let endpoints = self.endpoints().await?;
        let mut url = Url::parse(&endpoints.authorization_endpoint)
            .map_err(|e| AppError::Discovery(format!("invalid authorization_endpoint: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_url)
                .append_pair("response_type", "code")
                .append_pair("state", state)
                .append_pair("scope", SCOPE);
            if let Some(hint) = email_hint {
                query.append_pair("login_hint", hint);
            }
        }
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AppError> {
        let endpoints = self.endpoints().await?;
        let response = self
            .client
            .post(&endpoints.token_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = ensure_success("oidc", "token exchange", response)
            .await?
            .json()
            .await?;
        Ok(token.access_token)
    }

    async fn fetch_verified_user(&self, access_token: &str) -> Result<VerifiedUser, AppError> {
        let endpoints = self.endpoints().await?;
        let response = self
            .client
            .get(&endpoints.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user: OidcUser = ensure_success("oidc", "userinfo", response)
            .await?
            .json()
            .await?;

        let email = user
            .email
            .filter(|e| !e.is_empty() && is_email_verified(user.email_verified.as_ref()))
            .ok_or(AppError::EmailUnverified)?;

        Ok(VerifiedUser {
            provider_id: user.sub,
            email,
            name: user.name.filter(|n| !n.trim().is_empty()),
            avatar_url: user.picture.filter(|p| !p.is_empty()),
        })
    }
}
