//! Data models
//!
//! Rust structs representing stored auth entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    /// Unknown values are treated as inactive.
    pub fn parse(value: &str) -> Self {
        if value == "active" {
            UserStatus::Active
        } else {
            UserStatus::Inactive
        }
    }
}

/// A registered user. `email` is always stored lowercased.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Verified profile handed to the store after a provider callback
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthIdentity {
    /// "github", "google" or "oidc"
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Stored password hash plus lockout bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordCredential {
    pub user_id: String,
    pub password_hash: String,
    pub failed_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
}

// =============================================================================
// Sessions
// =============================================================================

/// A live web session joined with its owner
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// API Keys
// =============================================================================

/// API key metadata. The raw key is never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Result of a hash lookup: the key and the account it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyOwner {
    pub key_id: String,
    pub user: User,
}

// =============================================================================
// Device Codes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub key_name: String,
    pub expires_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Observable lifecycle state of a stored device code.
///
/// `consumed` is not represented: consumed rows are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCodeState {
    Pending,
    Authorized,
    Expired,
}

impl DeviceCode {
    pub fn state_at(&self, now: DateTime<Utc>) -> DeviceCodeState {
        if self.expires_at <= now {
            DeviceCodeState::Expired
        } else if self.authorized_at.is_some() && self.user_id.is_some() {
            DeviceCodeState::Authorized
        } else {
            DeviceCodeState::Pending
        }
    }
}

/// Convert a stored unix timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}
