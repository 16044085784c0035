//! confab-auth - Authentication core for a multi-tenant Confab deployment
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - Browser login: provider selector, OAuth, password         │
//! │  - CLI login: loopback hand-off, device flow                 │
//! │  - JSON API behind the auth middleware                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Auth Core                             │
//! │  - Credential validators (GitHub, Google, OIDC, password,    │
//! │    API keys)                                                 │
//! │  - Sessions, CSRF state, device codes                        │
//! │  - Access policy (allowlist, user cap, account status)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx) behind the `UserStore` trait                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: JSON endpoints and Prometheus metrics
//! - `auth`: Credential validation, sessions, middleware, login routes
//! - `data`: User store trait and SQLite implementation
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod validation;

use std::sync::Arc;

use auth::{
    AccessPolicy, ApiKeyManager, DeviceFlowManager, PasswordValidator, ProviderRegistry,
    SessionManager, UserCap,
};
use data::UserStore;

/// Application state shared across all handlers
///
/// Cloned for each request; every manager holds its store by `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Persistence for users, credentials, sessions and device codes
    pub store: Arc<dyn UserStore>,

    /// Web sessions
    pub sessions: SessionManager,

    /// API key issuance and validation
    pub api_keys: ApiKeyManager,

    /// Email/password credentials
    pub passwords: PasswordValidator,

    /// Domain allowlist and user cap
    pub policy: AccessPolicy,

    /// Device authorization flow
    pub device: DeviceFlowManager,

    /// Enabled OAuth/OIDC providers
    pub providers: Arc<ProviderRegistry>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Build the provider HTTP client and registry
    /// 3. Wire the credential managers
    /// 4. Create the bootstrap admin if the user table is empty
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!("Database connected");

        // 2-3. Providers and managers
        let state = Self::with_store(config, Arc::new(db), auth::password::BCRYPT_COST)?;

        // 4. Initialize admin user
        state.passwords.bootstrap_admin(&state.config).await?;

        tracing::info!(
            providers = state.providers.iter().count(),
            password_enabled = state.config.providers.password_enabled,
            "Application state initialized successfully"
        );

        Ok(state)
    }

    /// Build state over an existing store
    ///
    /// `bcrypt_cost` is the work factor for hashes created by this process.
    pub fn with_store(
        config: config::AppConfig,
        store: Arc<dyn UserStore>,
        bcrypt_cost: u32,
    ) -> Result<Self, error::AppError> {
        let http_client = auth::providers::build_http_client()?;
        let providers = ProviderRegistry::from_config(&config.providers, http_client);

        let cap = UserCap::from_setting(config.auth.max_users.as_deref());
        let policy = AccessPolicy::new(
            store.clone(),
            config.auth.allowed_email_domains.clone(),
            cap,
        );
        let sessions = SessionManager::new(
            store.clone(),
            config.auth.session_max_age,
            config.should_use_secure_cookies(),
        );
        let api_keys = ApiKeyManager::new(store.clone(), config.auth.api_key_limit);
        let device = DeviceFlowManager::new(
            store.clone(),
            api_keys.clone(),
            config.auth.device_code_ttl,
            config.auth.device_poll_interval,
        );
        let passwords = PasswordValidator::with_cost(store.clone(), bcrypt_cost);

        if providers.is_empty() && !config.providers.password_enabled {
            tracing::warn!("No login methods are enabled; only API keys will authenticate");
        }

        Ok(Self {
            config: Arc::new(config),
            store,
            sessions,
            api_keys,
            passwords,
            policy,
            device,
            providers: Arc::new(providers),
        })
    }

    /// Delete expired sessions and device codes; returns rows removed.
    pub async fn prune_expired(&self) -> Result<u64, error::AppError> {
        let sessions = self.store.delete_expired_web_sessions().await?;
        let device_codes = self.store.delete_expired_device_codes().await?;
        tracing::debug!(sessions, device_codes, "Expired rows pruned");
        Ok(sessions + device_codes)
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .nest("/api/v1", api::api_router(state.clone()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

/// Credentialed CORS for the frontend origin plus any configured extras.
fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::CorsLayer;

    let origins: Vec<HeaderValue> = std::iter::once(server.frontend_url())
        .chain(server.allowed_origins.iter().map(|o| o.trim_end_matches('/')))
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(
                    %error,
                    origin,
                    "Failed to parse CORS origin; skipping"
                );
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}
