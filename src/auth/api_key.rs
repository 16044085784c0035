//! API key issuance and validation
//!
//! Wire format: `cfb_` followed by 40 base64url characters. Only the
//! SHA-256 hex digest of the full key (prefix included) is stored.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::data::{ApiKey, ApiKeyOwner, UserStatus, UserStore};
use crate::error::AppError;

pub const API_KEY_PREFIX: &str = "cfb_";
const API_KEY_BODY_LEN: usize = 40;
const API_KEY_RANDOM_BYTES: usize = 32;

/// Generate a new raw key. Always 44 characters.
pub fn generate_api_key() -> String {
    let mut bytes = [0_u8; API_KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = URL_SAFE_NO_PAD.encode(bytes);
    format!("{API_KEY_PREFIX}{}", &encoded[..API_KEY_BODY_LEN])
}

/// SHA-256 hex digest of the full raw key.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Short, non-reversible identifier safe for logs.
pub fn log_fingerprint(key_hash: &str) -> &str {
    key_hash.get(..8).unwrap_or(key_hash)
}

/// A key as handed to its owner exactly once.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub raw_key: String,
}

/// Issues and validates API keys against the store
#[derive(Clone)]
pub struct ApiKeyManager {
    store: Arc<dyn UserStore>,
    limit: i64,
}

impl ApiKeyManager {
    pub fn new(store: Arc<dyn UserStore>, limit: i64) -> Self {
        Self { store, limit }
    }

    /// Issue a key named `name` for `user_id`, replacing any same-named key.
    ///
    /// `source` labels the issuance path in metrics ("cli", "device", "api").
    pub async fn issue(
        &self,
        user_id: &str,
        name: &str,
        source: &str,
    ) -> Result<IssuedApiKey, AppError> {
        let raw_key = generate_api_key();
        let key_hash = hash_api_key(&raw_key);

        let key = self
            .store
            .replace_api_key(user_id, name, &key_hash, self.limit)
            .await
            .inspect_err(|error| {
                if matches!(error, AppError::KeyLimitExceeded) {
                    tracing::warn!(user_id, limit = self.limit, "API key limit reached");
                }
            })?;

        self.record_issued(&key, &key_hash, source);
        Ok(IssuedApiKey { key, raw_key })
    }

    /// Redeem an authorized device code for a key named after the code.
    ///
    /// `Ok(None)` when the code is gone, pending or expired. A failed insert
    /// leaves the code redeemable.
    pub async fn redeem_device_code(
        &self,
        device_code: &str,
    ) -> Result<Option<IssuedApiKey>, AppError> {
        let raw_key = generate_api_key();
        let key_hash = hash_api_key(&raw_key);

        let redeemed = self
            .store
            .redeem_device_code(device_code, &key_hash, self.limit)
            .await
            .inspect_err(|error| {
                if matches!(error, AppError::KeyLimitExceeded) {
                    tracing::warn!(limit = self.limit, "API key limit reached on device exchange");
                }
            })?;

        Ok(redeemed.map(|(_, key)| {
            self.record_issued(&key, &key_hash, "device");
            IssuedApiKey { key, raw_key }
        }))
    }

    fn record_issued(&self, key: &ApiKey, key_hash: &str, source: &str) {
        crate::metrics::API_KEYS_ISSUED_TOTAL
            .with_label_values(&[source])
            .inc();
        tracing::info!(
            user_id = %key.user_id,
            key_id = %key.id,
            key_hash = %log_fingerprint(key_hash),
            source,
            "API key issued"
        );
    }

    /// Resolve a presented key to its owner.
    ///
    /// Unknown keys yield `InvalidCredential`; keys of inactive accounts
    /// yield `AccountInactive`. On success the key's last-used time is
    /// updated in the background.
    pub async fn validate(&self, raw_key: &str) -> Result<ApiKeyOwner, AppError> {
        let key_hash = hash_api_key(raw_key);

        let owner = match self.store.find_api_key_by_hash(&key_hash).await? {
            Some(owner) => owner,
            None => {
                tracing::debug!(key_hash = %log_fingerprint(&key_hash), "Unknown API key");
                return Err(AppError::InvalidCredential);
            }
        };

        if owner.user.status != UserStatus::Active {
            tracing::warn!(
                user_id = %owner.user.id,
                key_hash = %log_fingerprint(&key_hash),
                "API key rejected for inactive account"
            );
            return Err(AppError::AccountInactive);
        }

        let store = Arc::clone(&self.store);
        let key_id = owner.key_id.clone();
        tokio::spawn(async move {
            if let Err(error) = store.touch_api_key(&key_id).await {
                tracing::warn!(%error, key_id = %key_id, "Failed to update API key last_used_at");
            }
        });

        Ok(owner)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<ApiKey>, AppError> {
        self.store.list_api_keys(user_id).await
    }

    pub async fn revoke(&self, user_id: &str, key_id: &str) -> Result<(), AppError> {
        if self.store.delete_api_key(user_id, key_id).await? {
            tracing::info!(user_id, key_id, "API key revoked");
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}
