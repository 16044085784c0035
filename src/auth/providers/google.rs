//! Google OAuth

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{Provider, VerifiedUser, ensure_success};
use crate::config::GoogleConfig;
use crate::error::AppError;

const SCOPE: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

pub struct GoogleProvider {
    config: GoogleConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn display_name(&self) -> &str {
        "Google"
    }

    async fn authorize_url(&self, state: &str, email_hint: Option<&str>) -> Result<String, AppError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AppError::Config(format!("invalid Google authorize URL: {e}")))?;
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
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = ensure_success("google", "token exchange", response)
            .await?
            .json()
            .await?;
        Ok(token.access_token)
    }

    async fn fetch_verified_user(&self, access_token: &str) -> Result<VerifiedUser, AppError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user: GoogleUser = ensure_success("google", "userinfo", response)
            .await?
            .json()
            .await?;

        if !user.verified_email {
            return Err(AppError::EmailUnverified);
        }

        Ok(VerifiedUser {
            provider_id: user.id,
            email: user.email,
            name: user.name.filter(|n| !n.trim().is_empty()),
            avatar_url: user.picture.filter(|p| !p.is_empty()),
        })
    }
}
