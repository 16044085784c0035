//! Session management
//!
//! Sessions are opaque random tokens. Validity is a store lookup, so
//! deleting the row revokes the session immediately. Only the SHA-256 of
//! the token is persisted.

use std::sync::Arc;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::cookies::{self, SESSION_COOKIE};
use crate::data::{SessionRecord, UserStore};
use crate::error::AppError;

const TOKEN_BYTES: usize = 32;

/// A freshly issued session. `token` is the cookie value.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates and destroys web sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn UserStore>,
    max_age: Duration,
    secure_cookies: bool,
}

/// 32 random bytes, base64url without padding.
pub fn generate_session_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Storage key for a session token.
pub fn hash_session_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl SessionManager {
    pub fn new(store: Arc<dyn UserStore>, max_age_secs: i64, secure_cookies: bool) -> Self {
        Self {
            store,
            max_age: Duration::seconds(max_age_secs),
            secure_cookies,
        }
    }

    /// Create a session for `user_id`, expiring a fixed interval from now.
    pub async fn create_session(&self, user_id: &str) -> Result<IssuedSession, AppError> {
        let token = generate_session_token();
        let expires_at = Utc::now() + self.max_age;

        self.store
            .create_web_session(&hash_session_token(&token), user_id, expires_at)
            .await?;

        crate::metrics::SESSIONS_CREATED_TOTAL.inc();
        tracing::debug!(user_id, %expires_at, "Web session created");

        Ok(IssuedSession { token, expires_at })
    }

    /// Look up a live session. Unknown and expired tokens yield `None`.
    pub async fn validate_session(&self, token: &str) -> Result<Option<SessionRecord>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }
        self.store.get_web_session(&hash_session_token(token)).await
    }

    pub async fn destroy_session(&self, token: &str) -> Result<(), AppError> {
        self.store
            .delete_web_session(&hash_session_token(token))
            .await
    }

    /// Session cookie for a newly issued session.
    pub fn session_cookie(&self, session: &IssuedSession) -> Cookie<'static> {
        cookies::build(
            SESSION_COOKIE,
            session.token.clone(),
            self.max_age.num_seconds(),
            self.secure_cookies,
        )
    }

    /// Issue a session and attach its cookie.
    pub async fn login(&self, jar: CookieJar, user_id: &str) -> Result<CookieJar, AppError> {
        let session = self.create_session(user_id).await?;
        Ok(jar.add(self.session_cookie(&session)))
    }

    /// Destroy the session named by the cookie (if any) and clear the cookie.
    ///
    /// The cookie is cleared even when the store delete fails.
    pub async fn logout(&self, jar: CookieJar) -> CookieJar {
        if let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) {
            if let Err(error) = self.destroy_session(&token).await {
                tracing::warn!(%error, "Failed to delete web session during logout");
            }
        }
        jar.add(cookies::removal(SESSION_COOKIE, self.secure_cookies))
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}
