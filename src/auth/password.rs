//! Password credentials (bcrypt)
//!
//! Hashing and verification run on the blocking pool. Unknown emails
//! still pay for one bcrypt comparison against a dummy hash so the two
//! failure paths take comparable time.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::OnceCell;

use crate::config::AppConfig;
use crate::data::{User, UserStatus, UserStore};
use crate::error::AppError;
use crate::validation;

/// Production work factor
pub const BCRYPT_COST: u32 = 12;
/// Consecutive failures before the account locks
pub const MAX_FAILED_ATTEMPTS: i64 = 5;
/// Lock duration once `MAX_FAILED_ATTEMPTS` is reached
pub const LOCKOUT_MINUTES: i64 = 15;
pub const MIN_PASSWORD_LENGTH: usize = 8;

const DUMMY_PASSWORD: &str = "confab-dummy-password-for-timing";

#[derive(Clone)]
pub struct PasswordValidator {
    store: Arc<dyn UserStore>,
    cost: u32,
    dummy_hash: Arc<OnceCell<String>>,
}

impl PasswordValidator {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self::with_cost(store, BCRYPT_COST)
    }

    /// Custom work factor; tests use the bcrypt minimum.
    pub fn with_cost(store: Arc<dyn UserStore>, cost: u32) -> Self {
        Self {
            store,
            cost,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_owned();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to hash password: {e}")))
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        match verified {
            Ok(matches) => Ok(matches),
            Err(error) => {
                tracing::error!(%error, "Stored password hash could not be parsed");
                Ok(false)
            }
        }
    }

    async fn dummy_hash(&self) -> Result<&str, AppError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash_password(DUMMY_PASSWORD))
            .await?;
        Ok(hash.as_str())
    }

    /// Check an email/password pair.
    ///
    /// Errors: `InvalidCredential` for unknown email or wrong password,
    /// `AccountLocked` while locked (or on the failure that triggers the
    /// lock), `AccountInactive` for a correct password on an inactive
    /// account. Callers must not show these differently to the user.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = validation::normalize_email(email);

        let Some((user, credential)) = self.store.get_password_credential(&email).await? else {
            let dummy = self.dummy_hash().await?.to_owned();
            let _ = self.verify(password, &dummy).await?;
            return Err(AppError::InvalidCredential);
        };

        if credential.locked_until.is_some_and(|until| until > Utc::now()) {
            return Err(AppError::AccountLocked);
        }

        if !self.verify(password, &credential.password_hash).await? {
            let locked = self
                .store
                .record_password_failure(
                    &user.id,
                    MAX_FAILED_ATTEMPTS,
                    Duration::minutes(LOCKOUT_MINUTES),
                )
                .await?;
            return Err(if locked {
                tracing::warn!(user_id = %user.id, "Account locked after repeated password failures");
                AppError::AccountLocked
            } else {
                AppError::InvalidCredential
            });
        }

        if user.status != UserStatus::Active {
            return Err(AppError::AccountInactive);
        }

        self.store.reset_password_failures(&user.id).await?;
        Ok(user)
    }

    /// Create the first admin account from configuration.
    ///
    /// Does nothing when any user exists. With an empty user table and
    /// password login enabled, bootstrap credentials are required.
    pub async fn bootstrap_admin(&self, config: &AppConfig) -> Result<Option<User>, AppError> {
        let count = self.store.count_users().await?;
        if count > 0 {
            tracing::info!(user_count = count, "Users exist, skipping admin bootstrap");
            return Ok(None);
        }

        let (email, password) = match config.auth.bootstrap.as_ref() {
            Some(b) => (
                b.email.clone().unwrap_or_default(),
                b.password.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };

        if email.is_empty() || password.is_empty() {
            if config.providers.password_enabled {
                return Err(AppError::Config(
                    "auth.bootstrap.email and auth.bootstrap.password are required when no users exist"
                        .to_string(),
                ));
            }
            tracing::info!("No users and no bootstrap credentials; skipping admin bootstrap");
            return Ok(None);
        }

        let email = validation::normalize_email(&email);
        if !validation::is_valid_email(&email) {
            return Err(AppError::Config(
                "auth.bootstrap.email is not a valid email address".to_string(),
            ));
        }
        if !super::policy::is_allowed_domain(&email, &config.auth.allowed_email_domains) {
            return Err(AppError::Config(format!(
                "auth.bootstrap.email domain {:?} is not in auth.allowed_email_domains",
                validation::email_domain(&email).unwrap_or_default()
            )));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Config(format!(
                "auth.bootstrap.password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let hash = self.hash_password(&password).await?;
        let user = self.store.create_password_user(&email, &hash, true).await?;

        tracing::warn!(
            email = %user.email,
            user_id = %user.id,
            hint = "Change this password after first login",
            "=== ADMIN USER CREATED ==="
        );

        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::data::{MockUserStore, PasswordCredential};

    const TEST_COST: u32 = 4;

    fn user(status: UserStatus) -> User {
        User {
            id: "user-1".to_string(),
            email: "alice@example.com".to_string(),
            name: None,
            avatar_url: None,
            status,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    fn credential(hash: String, locked_for: Option<Duration>) -> PasswordCredential {
        PasswordCredential {
            user_id: "user-1".to_string(),
            password_hash: hash,
            failed_attempts: 0,
            locked_until: locked_for.map(|d| Utc::now() + d),
        }
    }

    fn stored_hash(password: &str) -> String {
        bcrypt::hash(password, TEST_COST).unwrap()
    }

    #[tokio::test]
    async fn correct_password_resets_failures() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store
            .expect_get_password_credential()
            .withf(|email| email == "alice@example.com")
            .returning(move |_| Ok(Some((user(UserStatus::Active), credential(hash.clone(), None)))));
        store
            .expect_reset_password_failures()
            .times(1)
            .returning(|_| Ok(()));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let user = validator
            .authenticate("  Alice@Example.com ", "correct horse")
            .await
            .unwrap();
        assert_eq!(user.id, "user-1");
    }

    #[tokio::test]
    async fn wrong_password_records_failure() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store
            .expect_get_password_credential()
            .returning(move |_| Ok(Some((user(UserStatus::Active), credential(hash.clone(), None)))));
        store
            .expect_record_password_failure()
            .withf(|_, max, lock| *max == MAX_FAILED_ATTEMPTS && *lock == Duration::minutes(15))
            .times(1)
            .returning(|_, _, _| Ok(false));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let result = validator.authenticate("alice@example.com", "wrong").await;
        assert!(matches!(result, Err(AppError::InvalidCredential)));
    }

    #[tokio::test]
    async fn fifth_failure_reports_lock() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store
            .expect_get_password_credential()
            .returning(move |_| Ok(Some((user(UserStatus::Active), credential(hash.clone(), None)))));
        store
            .expect_record_password_failure()
            .returning(|_, _, _| Ok(true));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let result = validator.authenticate("alice@example.com", "wrong").await;
        assert!(matches!(result, Err(AppError::AccountLocked)));
    }

    #[tokio::test]
    async fn locked_account_rejects_even_correct_password() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store.expect_get_password_credential().returning(move |_| {
            Ok(Some((
                user(UserStatus::Active),
                credential(hash.clone(), Some(Duration::minutes(10))),
            )))
        });

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let result = validator.authenticate("alice@example.com", "correct horse").await;
        assert!(matches!(result, Err(AppError::AccountLocked)));
    }

    #[tokio::test]
    async fn expired_lock_allows_login() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store.expect_get_password_credential().returning(move |_| {
            Ok(Some((
                user(UserStatus::Active),
                credential(hash.clone(), Some(Duration::minutes(-1))),
            )))
        });
        store.expect_reset_password_failures().returning(|_| Ok(()));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        assert!(validator.authenticate("alice@example.com", "correct horse").await.is_ok());
    }

    #[tokio::test]
    async fn inactive_account_is_rejected() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store.expect_get_password_credential().returning(move |_| {
            Ok(Some((user(UserStatus::Inactive), credential(hash.clone(), None))))
        });

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let result = validator.authenticate("alice@example.com", "correct horse").await;
        assert!(matches!(result, Err(AppError::AccountInactive)));
    }

    #[tokio::test]
    async fn unknown_email_pays_for_a_comparison() {
        let mut store = MockUserStore::new();
        store.expect_get_password_credential().returning(|_| Ok(None));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let result = validator.authenticate("nobody@example.com", "whatever").await;
        assert!(matches!(result, Err(AppError::InvalidCredential)));
        assert!(validator.dummy_hash.get().is_some());
    }

    #[tokio::test]
    async fn timing_of_failure_paths_is_comparable() {
        let hash = stored_hash("correct horse");
        let mut store = MockUserStore::new();
        store
            .expect_get_password_credential()
            .returning(move |email| {
                if email == "alice@example.com" {
                    Ok(Some((user(UserStatus::Active), credential(hash.clone(), None))))
                } else {
                    Ok(None)
                }
            });
        store
            .expect_record_password_failure()
            .returning(|_, _, _| Ok(false));

        let validator = PasswordValidator::with_cost(Arc::new(store), 8);
        // Warm the dummy hash so the first measurement is not skewed
        let _ = validator.authenticate("ghost@example.com", "x").await;

        let start = std::time::Instant::now();
        let _ = validator.authenticate("ghost@example.com", "x").await;
        let missing = start.elapsed();

        let start = std::time::Instant::now();
        let _ = validator.authenticate("alice@example.com", "x").await;
        let wrong = start.elapsed();

        let ratio = missing.as_secs_f64() / wrong.as_secs_f64();
        assert!((0.2..5.0).contains(&ratio), "ratio {ratio} too skewed");
    }

    #[tokio::test]
    async fn bootstrap_skipped_when_users_exist() {
        let mut store = MockUserStore::new();
        store.expect_count_users().returning(|| Ok(3));
        store.expect_create_password_user().never();

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let config = crate::config::tests::valid_config();
        assert!(validator.bootstrap_admin(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bootstrap_requires_credentials_on_empty_store() {
        let mut store = MockUserStore::new();
        store.expect_count_users().returning(|| Ok(0));

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let config = crate::config::tests::valid_config();
        let error = validator.bootstrap_admin(&config).await.unwrap_err();
        assert!(matches!(error, AppError::Config(msg) if msg.contains("auth.bootstrap")));
    }

    #[tokio::test]
    async fn bootstrap_validates_and_creates_admin() {
        let mut store = MockUserStore::new();
        store.expect_count_users().returning(|| Ok(0));
        store
            .expect_create_password_user()
            .withf(|email, hash, is_admin| {
                email == "admin@corp.com" && hash.starts_with("$2") && *is_admin
            })
            .returning(|email, _, _| {
                let mut admin = user(UserStatus::Active);
                admin.email = email.to_string();
                admin.is_admin = true;
                Ok(admin)
            });

        let validator = PasswordValidator::with_cost(Arc::new(store), TEST_COST);
        let mut config = crate::config::tests::valid_config();
        config.auth.allowed_email_domains = vec!["corp.com".to_string()];

        config.auth.bootstrap = Some(BootstrapConfig {
            email: Some("Admin@Other.com".to_string()),
            password: Some("long enough".to_string()),
        });
        assert!(validator.bootstrap_admin(&config).await.is_err());

        config.auth.bootstrap = Some(BootstrapConfig {
            email: Some("Admin@Corp.com".to_string()),
            password: Some("short".to_string()),
        });
        assert!(validator.bootstrap_admin(&config).await.is_err());

        config.auth.bootstrap = Some(BootstrapConfig {
            email: Some("Admin@Corp.com".to_string()),
            password: Some("long enough".to_string()),
        });
        let admin = validator.bootstrap_admin(&config).await.unwrap().unwrap();
        assert!(admin.is_admin);
        assert_eq!(admin.email, "admin@corp.com");
    }
}
