//! Persistence seam for the auth core
//!
//! Components depend on `Arc<dyn UserStore>`; `Database` is the SQLite
//! implementation. Atomicity guarantees each implementation must give are
//! noted on the individual methods.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::models::*;
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    // Users ------------------------------------------------------------------

    async fn count_users(&self) -> Result<i64>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Lookup by already-normalized email.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Resolve a provider identity to a user.
    ///
    /// Known identity: refresh the profile. Unknown identity with a matching
    /// email: link it to that user. Otherwise create user and identity.
    async fn find_or_create_user_by_oauth(&self, identity: &OAuthIdentity) -> Result<User>;

    async fn set_user_status(&self, user_id: &str, status: UserStatus) -> Result<()>;

    // Passwords --------------------------------------------------------------

    async fn create_password_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User>;

    async fn get_password_credential(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordCredential)>>;

    /// Increment the failure counter, locking the account for `lock_for`
    /// once it reaches `max_attempts`. Returns true when now locked.
    async fn record_password_failure(
        &self,
        user_id: &str,
        max_attempts: i64,
        lock_for: Duration,
    ) -> Result<bool>;

    async fn reset_password_failures(&self, user_id: &str) -> Result<()>;

    // Web sessions -----------------------------------------------------------

    async fn create_web_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Unexpired session joined with its owner.
    async fn get_web_session(&self, token_hash: &str) -> Result<Option<SessionRecord>>;

    async fn delete_web_session(&self, token_hash: &str) -> Result<()>;

    async fn delete_expired_web_sessions(&self) -> Result<u64>;

    // API keys ---------------------------------------------------------------

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyOwner>>;

    /// Insert a key, replacing any key with the same name for the user.
    ///
    /// The limit check and replacement run in one transaction; a brand-new
    /// name at the limit yields `AppError::KeyLimitExceeded`.
    async fn replace_api_key(
        &self,
        user_id: &str,
        name: &str,
        key_hash: &str,
        limit: i64,
    ) -> Result<ApiKey>;

    async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>>;

    /// Returns false when no key with that id belongs to the user.
    async fn delete_api_key(&self, user_id: &str, key_id: &str) -> Result<bool>;

    async fn touch_api_key(&self, key_id: &str) -> Result<()>;

    // Device codes -----------------------------------------------------------

    async fn create_device_code(&self, code: &DeviceCode) -> Result<()>;

    async fn get_device_code(&self, device_code: &str) -> Result<Option<DeviceCode>>;

    /// Link a pending, unexpired code to a user. Returns false otherwise.
    async fn authorize_device_code(&self, user_code: &str, user_id: &str) -> Result<bool>;

    /// Remove an authorized, unexpired code and store `key_hash` as an API
    /// key named after it for the approving user, in one transaction.
    ///
    /// Of two concurrent callers at most one receives `Some`. When the key
    /// insert fails (`AppError::KeyLimitExceeded` included) the code stays
    /// in place so a later poll can still redeem it.
    async fn redeem_device_code(
        &self,
        device_code: &str,
        key_hash: &str,
        limit: i64,
    ) -> Result<Option<(DeviceCode, ApiKey)>>;

    async fn delete_device_code(&self, device_code: &str) -> Result<()>;

    async fn delete_expired_device_codes(&self) -> Result<u64>;
}
