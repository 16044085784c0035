//! SQLite database operations
//!
//! All database access goes through this module.
//! Timestamps are stored as unix seconds so expiry comparisons are plain
//! integer comparisons in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use super::models::*;
use super::store::UserStore;
use crate::error::AppError;

const USER_COLUMNS: &str =
    "u.id, u.email, u.name, u.avatar_url, u.status, u.is_admin, u.created_at";

const DEVICE_CODE_COLUMNS: &str =
    "device_code, user_code, key_name, expires_at, authorized_at, user_id, created_at";

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    avatar_url: Option<String>,
    status: String,
    is_admin: bool,
    created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            name: row.name,
            avatar_url: row.avatar_url,
            status: UserStatus::parse(&row.status),
            is_admin: row.is_admin,
            created_at: from_unix(row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PasswordRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
    failed_attempts: i64,
    locked_until: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    #[sqlx(flatten)]
    user: UserRow,
    session_created_at: i64,
    expires_at: i64,
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    user_id: String,
    name: String,
    created_at: i64,
    last_used_at: Option<i64>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            created_at: from_unix(row.created_at),
            last_used_at: row.last_used_at.map(from_unix),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ApiKeyOwnerRow {
    key_id: String,
    #[sqlx(flatten)]
    user: UserRow,
}

#[derive(sqlx::FromRow)]
struct DeviceCodeRow {
    device_code: String,
    user_code: String,
    key_name: String,
    expires_at: i64,
    authorized_at: Option<i64>,
    user_id: Option<String>,
    created_at: i64,
}

impl From<DeviceCodeRow> for DeviceCode {
    fn from(row: DeviceCodeRow) -> Self {
        DeviceCode {
            device_code: row.device_code,
            user_code: row.user_code,
            key_name: row.key_name,
            expires_at: from_unix(row.expires_at),
            authorized_at: row.authorized_at.map(from_unix),
            user_id: row.user_id,
            created_at: from_unix(row.created_at),
        }
    }
}

/// Insert a key inside `tx`, replacing a same-named key or enforcing `limit`.
async fn insert_api_key(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    name: &str,
    key_hash: &str,
    limit: i64,
) -> Result<ApiKey, AppError> {
    let now = Utc::now().timestamp();

    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM api_keys WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;

    match existing {
        Some(old_id) => {
            sqlx::query("DELETE FROM api_keys WHERE id = ?")
                .bind(&old_id)
                .execute(&mut **tx)
                .await?;
            tracing::debug!(user_id, old_key_id = %old_id, "Replacing API key with same name");
        }
        None => {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_keys WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await?;
            if count >= limit {
                return Err(AppError::KeyLimitExceeded);
            }
        }
    }

    let key = ApiKey {
        id: EntityId::new().0,
        user_id: user_id.to_string(),
        name: name.to_string(),
        created_at: from_unix(now),
        last_used_at: None,
    };

    sqlx::query(
        "INSERT INTO api_keys (id, user_id, key_hash, name, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&key.id)
    .bind(user_id)
    .bind(key_hash)
    .bind(name)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(key)
}

fn default_display_name(email: &str) -> String {
    email
        .split_once('@')
        .map(|(local, _)| local.to_string())
        .unwrap_or_else(|| email.to_string())
}

impl Database {
    /// Open (creating if needed) the SQLite file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let db_path = path.to_str().ok_or_else(|| {
            AppError::Config(format!(
                "database path must be valid UTF-8: {}",
                path.display()
            ))
        })?;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path))?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Database(e.into()))?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    async fn fetch_user<'e, E>(executor: E, user_id: &str) -> Result<Option<User>, AppError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(User::from))
    }
}

#[async_trait]
impl UserStore for Database {
    // =========================================================================
    // Users
    // =========================================================================

    async fn count_users(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        Self::fetch_user(&self.pool, user_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Find or create a user for a verified provider identity
    ///
    /// Runs in a single transaction so a half-linked identity is never
    /// visible.
    async fn find_or_create_user_by_oauth(
        &self,
        identity: &OAuthIdentity,
    ) -> Result<User, AppError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u \
             JOIN user_identities i ON i.user_id = u.id \
             WHERE i.provider = ? AND i.provider_id = ?"
        );
        let linked = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&identity.provider)
            .bind(&identity.provider_id)
            .fetch_optional(&mut *tx)
            .await?;

        let user_id = if let Some(row) = linked {
            sqlx::query(
                "UPDATE users SET name = COALESCE(?, name), avatar_url = COALESCE(?, avatar_url), updated_at = ? WHERE id = ?",
            )
            .bind(&identity.name)
            .bind(&identity.avatar_url)
            .bind(now)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
            row.id
        } else {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?");
            let by_email = sqlx::query_as::<_, UserRow>(&sql)
                .bind(&identity.email)
                .fetch_optional(&mut *tx)
                .await?;

            let user_id = match by_email {
                Some(row) => {
                    tracing::info!(
                        user_id = %row.id,
                        provider = %identity.provider,
                        "Linking provider identity to existing user"
                    );
                    sqlx::query(
                        "UPDATE users SET name = COALESCE(name, ?), avatar_url = COALESCE(avatar_url, ?), updated_at = ? WHERE id = ?",
                    )
                    .bind(&identity.name)
                    .bind(&identity.avatar_url)
                    .bind(now)
                    .bind(&row.id)
                    .execute(&mut *tx)
                    .await?;
                    row.id
                }
                None => {
                    let user_id = EntityId::new().0;
                    sqlx::query(
                        "INSERT INTO users (id, email, name, avatar_url, status, is_admin, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, 'active', 0, ?, ?)",
                    )
                    .bind(&user_id)
                    .bind(&identity.email)
                    .bind(&identity.name)
                    .bind(&identity.avatar_url)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    tracing::info!(
                        user_id = %user_id,
                        provider = %identity.provider,
                        "Created user from provider identity"
                    );
                    user_id
                }
            };

            sqlx::query(
                "INSERT INTO user_identities (id, user_id, provider, provider_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(EntityId::new().0)
            .bind(&user_id)
            .bind(&identity.provider)
            .bind(&identity.provider_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            user_id
        };

        let user = Self::fetch_user(&mut *tx, &user_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user {user_id} vanished")))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn set_user_status(&self, user_id: &str, status: UserStatus) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Passwords
    // =========================================================================

    async fn create_password_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, AppError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
            .bind(email)
            .fetch_one(&mut *tx)
            .await?;
        if exists {
            return Err(AppError::Validation(format!(
                "user with email {email} already exists"
            )));
        }

        let user_id = EntityId::new().0;
        sqlx::query(
            "INSERT INTO users (id, email, name, status, is_admin, created_at, updated_at) \
             VALUES (?, ?, ?, 'active', ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(email)
        .bind(default_display_name(email))
        .bind(is_admin)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO user_identities (id, user_id, provider, provider_id, created_at) VALUES (?, ?, 'password', ?, ?)",
        )
        .bind(EntityId::new().0)
        .bind(&user_id)
        .bind(email)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO password_credentials (user_id, password_hash, failed_attempts, created_at, updated_at) \
             VALUES (?, ?, 0, ?, ?)",
        )
        .bind(&user_id)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let user = Self::fetch_user(&mut *tx, &user_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user {user_id} vanished")))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn get_password_credential(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordCredential)>, AppError> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, p.password_hash, p.failed_attempts, p.locked_until \
             FROM users u JOIN password_credentials p ON p.user_id = u.id \
             WHERE u.email = ?"
        );
        let row = sqlx::query_as::<_, PasswordRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let credential = PasswordCredential {
                user_id: row.user.id.clone(),
                password_hash: row.password_hash,
                failed_attempts: row.failed_attempts,
                locked_until: row.locked_until.map(from_unix),
            };
            (User::from(row.user), credential)
        }))
    }

    async fn record_password_failure(
        &self,
        user_id: &str,
        max_attempts: i64,
        lock_for: Duration,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let attempts: Option<i64> = sqlx::query_scalar(
            "UPDATE password_credentials \
             SET failed_attempts = failed_attempts + 1, \
                 locked_until = CASE WHEN failed_attempts + 1 >= ? THEN ? ELSE locked_until END, \
                 updated_at = ? \
             WHERE user_id = ? \
             RETURNING failed_attempts",
        )
        .bind(max_attempts)
        .bind((now + lock_for).timestamp())
        .bind(now.timestamp())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts.is_some_and(|n| n >= max_attempts))
    }

    async fn reset_password_failures(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE password_credentials SET failed_attempts = 0, locked_until = NULL, updated_at = ? WHERE user_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Web sessions
    // =========================================================================

    async fn create_web_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO web_sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_web_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AppError> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, s.created_at AS session_created_at, s.expires_at \
             FROM web_sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.token_hash = ? AND s.expires_at > ?"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(token_hash)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| SessionRecord {
            user: User::from(row.user),
            created_at: from_unix(row.session_created_at),
            expires_at: from_unix(row.expires_at),
        }))
    }

    async fn delete_web_session(&self, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM web_sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_web_sessions(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM web_sessions WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // API keys
    // =========================================================================

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyOwner>, AppError> {
        let sql = format!(
            "SELECT k.id AS key_id, {USER_COLUMNS} \
             FROM api_keys k JOIN users u ON u.id = k.user_id \
             WHERE k.key_hash = ?"
        );
        let row = sqlx::query_as::<_, ApiKeyOwnerRow>(&sql)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ApiKeyOwner {
            key_id: row.key_id,
            user: User::from(row.user),
        }))
    }

    async fn replace_api_key(
        &self,
        user_id: &str,
        name: &str,
        key_hash: &str,
        limit: i64,
    ) -> Result<ApiKey, AppError> {
        let mut tx = self.pool.begin().await?;
        let key = insert_api_key(&mut tx, user_id, name, key_hash, limit).await?;
        tx.commit().await?;
        Ok(key)
    }

    async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>, AppError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, user_id, name, created_at, last_used_at FROM api_keys \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn delete_api_key(&self, user_id: &str, key_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key(&self, key_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Device codes
    // =========================================================================

    async fn create_device_code(&self, code: &DeviceCode) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO device_codes (device_code, user_code, key_name, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&code.device_code)
        .bind(&code.user_code)
        .bind(&code.key_name)
        .bind(code.expires_at.timestamp())
        .bind(code.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device_code(&self, device_code: &str) -> Result<Option<DeviceCode>, AppError> {
        let sql = format!("SELECT {DEVICE_CODE_COLUMNS} FROM device_codes WHERE device_code = ?");
        let row = sqlx::query_as::<_, DeviceCodeRow>(&sql)
            .bind(device_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DeviceCode::from))
    }

    async fn authorize_device_code(&self, user_code: &str, user_id: &str) -> Result<bool, AppError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE device_codes SET authorized_at = ?, user_id = ? \
             WHERE user_code = ? AND expires_at > ? AND authorized_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .bind(user_code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn redeem_device_code(
        &self,
        device_code: &str,
        key_hash: &str,
        limit: i64,
    ) -> Result<Option<(DeviceCode, ApiKey)>, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "DELETE FROM device_codes \
             WHERE device_code = ? AND authorized_at IS NOT NULL AND user_id IS NOT NULL AND expires_at > ? \
             RETURNING {DEVICE_CODE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DeviceCodeRow>(&sql)
            .bind(device_code)
            .bind(Utc::now().timestamp())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(code) = row.map(DeviceCode::from) else {
            return Ok(None);
        };
        let Some(user_id) = code.user_id.as_deref() else {
            return Ok(None);
        };

        // Dropping the transaction on error restores the code row
        let key = insert_api_key(&mut tx, user_id, &code.key_name, key_hash, limit).await?;
        tx.commit().await?;
        Ok(Some((code, key)))
    }

    async fn delete_device_code(&self, device_code: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM device_codes WHERE device_code = ?")
            .bind(device_code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_device_codes(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM device_codes WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
