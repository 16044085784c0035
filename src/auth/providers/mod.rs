//! Identity providers
//!
//! Each provider turns an authorization code into a verified identity.
//! The shared callback pipeline (`auth::callback`) drives them through the
//! `Provider` trait, so CSRF, policy and session handling live in one place.

mod github;
mod google;
mod oidc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProvidersConfig;
use crate::data::OAuthIdentity;
use crate::error::AppError;

pub use github::GitHubProvider;
pub use google::GoogleProvider;
pub use oidc::{OidcEndpoints, OidcProvider};

/// Timeout for every provider HTTP call (token, userinfo, discovery)
pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity as reported by a provider, after its verified-email policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub provider_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl VerifiedUser {
    pub fn into_identity(self, provider: &str) -> OAuthIdentity {
        OAuthIdentity {
            provider: provider.to_string(),
            provider_id: self.provider_id,
            email: self.email,
            name: self.name,
            avatar_url: self.avatar_url,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Path segment and identity-table key: "github", "google", "oidc"
    fn name(&self) -> &'static str;

    /// Label for the login selector
    fn display_name(&self) -> &str;

    /// Provider authorization URL carrying `state` and an optional login hint.
    async fn authorize_url(&self, state: &str, email_hint: Option<&str>) -> Result<String, AppError>;

    /// Exchange an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, AppError>;

    /// Fetch the user's profile, applying the provider's verified-email policy.
    async fn fetch_verified_user(&self, access_token: &str) -> Result<VerifiedUser, AppError>;
}

/// HTTP client shared by all providers.
pub fn build_http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .user_agent(concat!("confab-auth/", env!("CARGO_PKG_VERSION")))
        .timeout(PROVIDER_HTTP_TIMEOUT)
        .build()
        .map_err(AppError::HttpClient)
}

/// Map a non-success provider response to `UpstreamProvider`.
///
/// The body is logged at debug level and never returned to callers.
pub(crate) async fn ensure_success(
    provider: &str,
    step: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, step, %status, "Provider request failed");
    tracing::debug!(provider, step, body = %body.chars().take(512).collect::<String>());
    Err(AppError::UpstreamProvider(format!(
        "{provider} {step} returned status {}",
        status.as_u16()
    )))
}

/// Enabled providers, in login-selector order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::default();
        if let Some(github) = &config.github {
            registry.register(Arc::new(GitHubProvider::new(github.clone(), client.clone())));
        }
        if let Some(google) = &config.google {
            registry.register(Arc::new(GoogleProvider::new(google.clone(), client.clone())));
        }
        if let Some(oidc) = &config.oidc {
            registry.register(Arc::new(OidcProvider::new(oidc.clone(), client)));
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitHubConfig, OidcConfig};

    #[test]
    fn registry_follows_config() {
        let mut config = ProvidersConfig::default();
        let client = build_http_client().unwrap();
        assert!(ProviderRegistry::from_config(&config, client.clone()).is_empty());

        config.github = Some(GitHubConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "http://localhost:8080/auth/github/callback".to_string(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            api_url: "https://api.github.com".to_string(),
        });
        config.oidc = Some(OidcConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "http://localhost:8080/auth/oidc/callback".to_string(),
            issuer_url: "https://idp.example.com".to_string(),
            display_name: "Okta".to_string(),
        });

        let registry = ProviderRegistry::from_config(&config, client);
        let names: Vec<_> = registry.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["github", "oidc"]);
        assert_eq!(registry.get("oidc").unwrap().display_name(), "Okta");
        assert!(registry.get("google").is_none());
    }

    #[test]
    fn verified_user_becomes_identity() {
        let identity = VerifiedUser {
            provider_id: "42".to_string(),
            email: "a@example.com".to_string(),
            name: Some("A".to_string()),
            avatar_url: None,
        }
        .into_identity("github");
        assert_eq!(identity.provider, "github");
        assert_eq!(identity.provider_id, "42");
    }
}
