//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! The validated struct is built once at start-up and shared by `Arc`.
//! Nothing else in the crate reads the process environment.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public backend origin (e.g., "https://api.confab.example.com")
    pub base_url: String,
    /// Frontend origin prepended to non-backend redirect paths
    pub frontend_url: String,
    /// Extra CORS origins. The frontend origin is always allowed.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Backend origin without trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Frontend origin without trailing slash
    pub fn frontend_url(&self) -> &str {
        self.frontend_url.trim_end_matches('/')
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Access policy and credential lifetimes
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Drop the `Secure` cookie attribute (plain-http local development)
    #[serde(default)]
    pub insecure_dev_mode: bool,
    /// Email domains allowed to sign in. Empty means any domain.
    #[serde(default)]
    pub allowed_email_domains: Vec<String>,
    /// Raw user cap override; parsed by `auth::policy::UserCap`
    #[serde(default)]
    pub max_users: Option<String>,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// Maximum API keys per user (default: 500)
    pub api_key_limit: i64,
    /// Device code lifetime in seconds (default: 300)
    pub device_code_ttl: i64,
    /// Advertised device polling interval in seconds (default: 5)
    pub device_poll_interval: i64,
    /// First-run admin credentials
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,
}

/// Initial admin credentials, only used while the user table is empty
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Enabled login methods. A provider is enabled when its section is present.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub password_enabled: bool,
    pub github: Option<GitHubConfig>,
    pub google: Option<GoogleConfig>,
    pub oidc: Option<OidcConfig>,
}

/// GitHub OAuth application
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_github_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_github_token_url")]
    pub token_url: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

fn default_github_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

/// Google OAuth client
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_google_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
}

fn default_google_authorize_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

/// Generic OpenID Connect provider
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    /// Issuer URL; endpoints are discovered from its metadata document
    pub issuer_url: String,
    /// Label on the login button (default: "SSO")
    #[serde(default = "default_oidc_display_name")]
    pub display_name: String,
}

fn default_oidc_display_name() -> String {
    "SSO".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CONFAB__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("server.frontend_url", "http://localhost:5173")?
            .set_default("database.path", "data/confab.db")?
            .set_default("auth.insecure_dev_mode", false)?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.api_key_limit", 500)?
            .set_default("auth.device_code_ttl", 300)?
            .set_default("auth.device_poll_interval", 5)?
            .set_default("providers.password_enabled", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (CONFAB__*)
            .add_source(
                Environment::with_prefix("CONFAB")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.allowed_email_domains")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let mut app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.auth.allowed_email_domains =
            crate::validation::normalize_domain_list(&app_config.auth.allowed_email_domains);
        app_config.validate()?;
        Ok(app_config)
    }

    /// Whether cookies carry the `Secure` attribute.
    pub fn should_use_secure_cookies(&self) -> bool {
        !self.auth.insecure_dev_mode
    }

    pub(crate) fn validate(&self) -> Result<(), AppError> {
        require_http_url("server.base_url", &self.server.base_url)?;
        require_http_url("server.frontend_url", &self.server.frontend_url)?;

        for (key, value) in [
            ("auth.session_max_age", self.auth.session_max_age),
            ("auth.api_key_limit", self.auth.api_key_limit),
            ("auth.device_code_ttl", self.auth.device_code_ttl),
            ("auth.device_poll_interval", self.auth.device_poll_interval),
        ] {
            if value <= 0 {
                return Err(AppError::Config(format!("{key} must be greater than 0")));
            }
        }

        crate::validation::validate_domain_list(&self.auth.allowed_email_domains)
            .map_err(|e| AppError::Config(format!("auth.allowed_email_domains: {e}")))?;

        if let Some(raw) = self.auth.max_users.as_deref() {
            if let Ok(cap) = raw.trim().parse::<i64>() {
                if cap < 0 {
                    return Err(AppError::Config(
                        "auth.max_users must not be negative".to_string(),
                    ));
                }
            }
        }

        if let Some(github) = &self.providers.github {
            require_client("providers.github", &github.client_id, &github.client_secret)?;
            require_http_url("providers.github.redirect_url", &github.redirect_url)?;
        }
        if let Some(google) = &self.providers.google {
            require_client("providers.google", &google.client_id, &google.client_secret)?;
            require_http_url("providers.google.redirect_url", &google.redirect_url)?;
        }
        if let Some(oidc) = &self.providers.oidc {
            require_client("providers.oidc", &oidc.client_id, &oidc.client_secret)?;
            require_http_url("providers.oidc.redirect_url", &oidc.redirect_url)?;
            require_http_url("providers.oidc.issuer_url", &oidc.issuer_url)?;
        }

        if !self.should_use_secure_cookies() {
            tracing::warn!(
                base_url = %self.server.base_url,
                "Using insecure cookies for local development"
            );
        }

        Ok(())
    }
}

fn require_http_url(key: &str, value: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Config(format!("{key} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppError::Config(format!(
            "{key} must be an absolute http(s) URL"
        )));
    }
    Ok(())
}

fn require_client(section: &str, client_id: &str, client_secret: &str) -> Result<(), AppError> {
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        return Err(AppError::Config(format!(
            "{section} requires client_id and client_secret"
        )));
    }
    Ok(())
}
