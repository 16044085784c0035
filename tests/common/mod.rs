//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;

use confab_auth::data::{Database, User};
use confab_auth::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const FRONTEND_URL: &str = "http://localhost:5173";

/// bcrypt work factor for hashes created in tests
const TEST_BCRYPT_COST: u32 = 4;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Client that does not follow redirects, so `Location` can be asserted
    pub client: reqwest::Client,
}

/// Baseline configuration: password login on, no OAuth providers.
pub fn test_config(base_url: &str, db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            base_url: base_url.to_string(),
            frontend_url: FRONTEND_URL.to_string(),
            allowed_origins: Vec::new(),
        },
        database: config::DatabaseConfig { path: db_path },
        auth: config::AuthConfig {
            insecure_dev_mode: true,
            allowed_email_domains: Vec::new(),
            max_users: None,
            session_max_age: 604800,
            api_key_limit: 500,
            device_code_ttl: 300,
            device_poll_interval: 5,
            bootstrap: None,
        },
        providers: config::ProvidersConfig {
            password_enabled: true,
            github: None,
            google: None,
            oidc: None,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the baseline configuration
    pub async fn with_config(customize: impl FnOnce(&mut config::AppConfig)) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so the public base URL is known
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let mut config = test_config(&addr_str, db_path.clone());
        customize(&mut config);

        let db = Database::connect(&db_path).await.unwrap();
        let state = AppState::with_store(config, Arc::new(db), TEST_BCRYPT_COST).unwrap();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let app = confab_auth::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a password user directly in the store
    pub async fn create_password_user(&self, email: &str, password: &str) -> User {
        let hash = self.state.passwords.hash_password(password).await.unwrap();
        self.state
            .store
            .create_password_user(email, &hash, false)
            .await
            .unwrap()
    }

    /// `Cookie` header value carrying a fresh session for `user_id`
    pub async fn session_cookie(&self, user_id: &str) -> String {
        let session = self.state.sessions.create_session(user_id).await.unwrap();
        format!("confab_session={}", session.token)
    }

    /// Issue a raw API key for `user_id`
    pub async fn api_key(&self, user_id: &str) -> String {
        self.state
            .api_keys
            .issue(user_id, "test key", "api")
            .await
            .unwrap()
            .raw_key
    }
}

/// `Location` header of a redirect response
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Value a `Set-Cookie` header assigns to `name`, if any
pub fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            cookie
                .strip_prefix(&prefix)
                .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
        })
}

/// Query parameter `name` from an absolute or relative URL
pub fn query_param(target: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(target)
        .or_else(|_| url::Url::parse("http://placeholder").and_then(|base| base.join(target)))
        .ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
