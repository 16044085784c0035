//! GitHub OAuth
//!
//! The profile's public email is ignored. The address used is always the
//! one `/user/emails` marks both primary and verified.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{Provider, VerifiedUser, ensure_success};
use crate::config::GitHubConfig;
use crate::error::AppError;

const SCOPE: &str = "read:user user:email";
const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct GitHubProvider {
    config: GitHubConfig,
    client: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: GitHubConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        step: &str,
        url: String,
        access_token: &str,
    ) -> Result<T, AppError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, ACCEPT_GITHUB_JSON)
            .send()
            .await?;
        let response = ensure_success("github", step, response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn display_name(&self) -> &str {
        "GitHub"
    }

    async fn authorize_url(&self, state: &str, email_hint: Option<&str>) -> Result<String, AppError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AppError::Config(format!("invalid GitHub authorize URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_url)
                .append_pair("state", state)
                .append_pair("scope", SCOPE);
            if let Some(hint) = email_hint {
                query.append_pair("login", hint);
            }
        }
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = ensure_success("github", "token exchange", response)
            .await?
            .json()
            .await?;

        match token {
            TokenResponse {
                access_token: Some(access_token),
                ..
            } if !access_token.is_empty() => Ok(access_token),
            TokenResponse { error, .. } => {
                // GitHub reports bad codes with 200 and an `error` field
                tracing::warn!(error = ?error, "GitHub token exchange rejected");
                Err(AppError::UpstreamProvider(format!(
                    "github token exchange failed: {}",
                    error.unwrap_or_else(|| "no access token".to_string())
                )))
            }
        }
    }

    async fn fetch_verified_user(&self, access_token: &str) -> Result<VerifiedUser, AppError> {
        let user: GitHubUser = self
            .get_json("user", self.api("/user"), access_token)
            .await?;
        let emails: Vec<GitHubEmail> = self
            .get_json("user emails", self.api("/user/emails"), access_token)
            .await?;

        let email = emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email)
            .ok_or(AppError::EmailUnverified)?;

        let name = user
            .name
            .filter(|n| !n.trim().is_empty())
            .or(Some(user.login));

        Ok(VerifiedUser {
            provider_id: user.id.to_string(),
            email,
            name,
            avatar_url: user.avatar_url.filter(|u| !u.is_empty()),
        })
    }
}
