//! Error types for confab-auth
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Browser-facing flows map the same variants onto redirects instead
//! (see `auth::callback`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Covers the authentication taxonomy (CSRF, credentials, policy,
/// device flow, upstream providers) plus infrastructure failures.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// OAuth state cookie and query parameter did not match (400)
    #[error("Invalid state parameter")]
    InvalidState,

    /// No credential was presented (401)
    #[error("Authentication required")]
    MissingCredential,

    /// Credential was presented but is unknown, expired or wrong (401)
    #[error("Invalid or expired credentials")]
    InvalidCredential,

    /// Too many failed password attempts (403)
    #[error("Account is temporarily locked")]
    AccountLocked,

    /// Account exists but is not active (403)
    #[error("Access denied")]
    AccountInactive,

    /// Email domain is not on the allowlist (403)
    #[error("Access denied")]
    DomainNotAllowed,

    /// New signups are blocked by the deployment's user cap (403)
    #[error("This application has reached its user limit. Contact the administrator for access.")]
    UserCapReached,

    /// Provider did not report a verified email (403)
    #[error("Your email address is not verified with the identity provider")]
    EmailUnverified,

    /// Device code unknown or already consumed (400)
    #[error("Invalid or already used device code")]
    InvalidGrant,

    /// Device code TTL elapsed (400)
    #[error("Device code has expired")]
    ExpiredToken,

    /// Device code not yet authorized by a user (401)
    #[error("Waiting for user authorization")]
    AuthorizationPending,

    /// Per-user API key cap reached (409)
    #[error("API key limit exceeded")]
    KeyLimitExceeded,

    /// OAuth/OIDC network or protocol failure (502)
    #[error("Upstream provider error: {0}")]
    UpstreamProvider(String),

    /// OIDC metadata unreachable, invalid or issuer mismatch (502)
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Machine-readable error code used in JSON bodies and redirect
    /// `error=` parameters.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::InvalidState => "invalid_state",
            AppError::MissingCredential | AppError::InvalidCredential => "unauthorized",
            AppError::AccountLocked => "account_locked",
            AppError::AccountInactive | AppError::DomainNotAllowed => "forbidden",
            AppError::UserCapReached => "access_denied",
            AppError::EmailUnverified => "email_unverified",
            AppError::InvalidGrant => "invalid_grant",
            AppError::ExpiredToken => "expired_token",
            AppError::AuthorizationPending => "authorization_pending",
            AppError::KeyLimitExceeded => "api_key_limit_exceeded",
            AppError::UpstreamProvider(_) | AppError::HttpClient(_) => "upstream_error",
            AppError::Discovery(_) => "oidc_error",
            AppError::Validation(_) => "invalid_request",
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidState
            | AppError::Validation(_)
            | AppError::InvalidGrant
            | AppError::ExpiredToken => StatusCode::BAD_REQUEST,
            AppError::MissingCredential
            | AppError::InvalidCredential
            | AppError::AuthorizationPending => StatusCode::UNAUTHORIZED,
            AppError::AccountLocked
            | AppError::AccountInactive
            | AppError::DomainNotAllowed
            | AppError::UserCapReached
            | AppError::EmailUnverified => StatusCode::FORBIDDEN,
            AppError::KeyLimitExceeded => StatusCode::CONFLICT,
            AppError::UpstreamProvider(_) | AppError::Discovery(_) | AppError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// One-line, caller-safe description.
    ///
    /// Upstream bodies and store errors stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::UpstreamProvider(_) | AppError::HttpClient(_) => {
                "The identity provider could not be reached".to_string()
            }
            AppError::Discovery(_) => "The identity provider is misconfigured".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Body shape: `{"error": <code>, "error_description": <message>}`.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[code]).inc();

        let body = Json(serde_json::json!({
            "error": code,
            "error_description": self.public_message(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
