//! Access policy: domain allowlist, user cap, account status

use std::sync::Arc;

use crate::data::{UserStatus, UserStore};
use crate::error::AppError;
use crate::validation;

/// Cap applied when `auth.max_users` is unset or unparseable
pub const DEFAULT_MAX_USERS: i64 = 50;

/// Maximum number of distinct users allowed to sign up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCap(pub i64);

impl UserCap {
    /// Parse the raw `auth.max_users` setting.
    pub fn from_setting(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self(DEFAULT_MAX_USERS);
        };
        match raw.parse::<i64>() {
            Ok(cap) => Self(cap),
            Err(_) => {
                tracing::warn!(
                    value = raw,
                    default = DEFAULT_MAX_USERS,
                    "Invalid auth.max_users, using default"
                );
                Self(DEFAULT_MAX_USERS)
            }
        }
    }
}

impl Default for UserCap {
    fn default() -> Self {
        Self(DEFAULT_MAX_USERS)
    }
}

/// True when the allowlist is empty or the email's domain is on it.
pub fn is_allowed_domain(email: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let Some(domain) = validation::email_domain(email) else {
        return false;
    };
    allowlist
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&domain))
}

pub fn is_active(status: UserStatus) -> bool {
    status == UserStatus::Active
}

#[derive(Clone)]
pub struct AccessPolicy {
    store: Arc<dyn UserStore>,
    allowed_domains: Arc<Vec<String>>,
    cap: UserCap,
}

impl AccessPolicy {
    pub fn new(store: Arc<dyn UserStore>, allowed_domains: Vec<String>, cap: UserCap) -> Self {
        Self {
            store,
            allowed_domains: Arc::new(allowed_domains),
            cap,
        }
    }

    pub fn has_domain_restriction(&self) -> bool {
        !self.allowed_domains.is_empty()
    }

    pub fn is_allowed_domain(&self, email: &str) -> bool {
        is_allowed_domain(email, &self.allowed_domains)
    }

    pub fn cap(&self) -> UserCap {
        self.cap
    }

    /// Existing users always pass; new emails pass while below the cap.
    ///
    /// Store failures propagate; they never default to allow.
    pub async fn can_login(&self, email: &str) -> Result<bool, AppError> {
        let email = validation::normalize_email(email);
        if self.store.get_user_by_email(&email).await?.is_some() {
            return Ok(true);
        }
        let count = self.store.count_users().await?;
        Ok(count < self.cap.0)
    }

    /// Domain then cap check for an email about to be logged in.
    pub async fn check_login(&self, email: &str) -> Result<(), AppError> {
        if !self.is_allowed_domain(email) {
            return Err(AppError::DomainNotAllowed);
        }
        if !self.can_login(email).await? {
            tracing::warn!(cap = self.cap.0, "User cap reached, rejecting new signup");
            return Err(AppError::UserCapReached);
        }
        Ok(())
    }
}
