//! Device authorization flow for headless CLI login
//!
//! pending -> authorized -> consumed (row deleted, key issued)
//!        \-> expired (row deleted on next touch)

use chrono::{Duration, Utc};
use rand::{Rng, RngCore};
use serde::Serialize;
use std::sync::Arc;

use super::api_key::{ApiKeyManager, IssuedApiKey};
use crate::data::{DeviceCode, DeviceCodeState, UserStore};
use crate::error::AppError;
use crate::metrics::DEVICE_CODES_TOTAL;
use crate::validation;

/// Human-typable symbols: no 0, O, I, L or 1
pub const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const DEFAULT_KEY_NAME: &str = "CLI Key";
const USER_CODE_LEN: usize = 8;
const DEVICE_CODE_BYTES: usize = 32;
const CREATE_ATTEMPTS: usize = 3;

/// Dash variants that show up when a code is copy-pasted
const DASHES: &[char] = &[
    '-', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}',
    '\u{FE58}', '\u{FE63}', '\u{FF0D}',
];

/// Response to a device authorization request
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// `XXXX-XXXX` over `USER_CODE_ALPHABET`.
pub fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = (0..USER_CODE_LEN)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect();
    let (head, tail) = chars.split_at(USER_CODE_LEN / 2);
    format!(
        "{}-{}",
        head.iter().collect::<String>(),
        tail.iter().collect::<String>()
    )
}

/// 32 random bytes, hex.
pub fn generate_device_code() -> String {
    let mut bytes = [0_u8; DEVICE_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Canonical form of a user-entered code.
///
/// Uppercases, drops whitespace and dash variants, and re-inserts the
/// hyphen when eight symbols remain. Anything else is returned as typed
/// (uppercased) and will simply fail lookup.
pub fn normalize_user_code(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| !DASHES.contains(c) && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    if cleaned.chars().count() == USER_CODE_LEN && cleaned.is_ascii() {
        format!("{}-{}", &cleaned[..4], &cleaned[4..])
    } else {
        cleaned
    }
}

#[derive(Clone)]
pub struct DeviceFlowManager {
    store: Arc<dyn UserStore>,
    api_keys: ApiKeyManager,
    ttl: Duration,
    interval: i64,
}

impl DeviceFlowManager {
    pub fn new(
        store: Arc<dyn UserStore>,
        api_keys: ApiKeyManager,
        ttl_secs: i64,
        interval_secs: i64,
    ) -> Self {
        Self {
            store,
            api_keys,
            ttl: Duration::seconds(ttl_secs),
            interval: interval_secs,
        }
    }

    /// Start a device authorization for a key to be named `key_name`.
    pub async fn initiate(&self, key_name: Option<&str>) -> Result<DeviceAuthorization, AppError> {
        let key_name = key_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_KEY_NAME);
        validation::validate_api_key_name(key_name).map_err(AppError::Validation)?;

        let mut attempt = 0;
        let code = loop {
            attempt += 1;
            let now = Utc::now();
            let code = DeviceCode {
                device_code: generate_device_code(),
                user_code: generate_user_code(),
                key_name: key_name.to_string(),
                expires_at: now + self.ttl,
                authorized_at: None,
                user_id: None,
                created_at: now,
            };
            match self.store.create_device_code(&code).await {
                Ok(()) => break code,
                // user_code is unique; a collision just needs a fresh draw
                Err(AppError::Database(error)) if attempt < CREATE_ATTEMPTS => {
                    tracing::debug!(%error, attempt, "Device code insert failed, retrying");
                }
                Err(error) => return Err(error),
            }
        };

        DEVICE_CODES_TOTAL.with_label_values(&["issued"]).inc();
        tracing::info!(user_code = %code.user_code, key_name, "Device code issued");

        Ok(DeviceAuthorization {
            device_code: code.device_code,
            user_code: code.user_code,
            expires_in: self.ttl.num_seconds(),
            interval: self.interval,
        })
    }

    /// Link a pending code to the signed-in user.
    ///
    /// Unknown, expired or already authorized codes yield `InvalidGrant`.
    pub async fn authorize(&self, user_code: &str, user_id: &str) -> Result<(), AppError> {
        let user_code = normalize_user_code(user_code);
        if user_code.is_empty() {
            return Err(AppError::Validation("Missing code".to_string()));
        }

        if !self.store.authorize_device_code(&user_code, user_id).await? {
            tracing::warn!(user_code = %user_code, user_id, "Device code authorization failed");
            return Err(AppError::InvalidGrant);
        }

        DEVICE_CODES_TOTAL.with_label_values(&["authorized"]).inc();
        tracing::info!(user_code = %user_code, user_id, "Device code authorized");
        Ok(())
    }

    /// Redeem a device code for an API key. Succeeds at most once per code.
    pub async fn exchange(&self, device_code: &str) -> Result<IssuedApiKey, AppError> {
        if device_code.is_empty() {
            return Err(AppError::Validation("device_code is required".to_string()));
        }

        let Some(code) = self.store.get_device_code(device_code).await? else {
            return Err(AppError::InvalidGrant);
        };

        match code.state_at(Utc::now()) {
            DeviceCodeState::Expired => {
                self.store.delete_device_code(device_code).await?;
                DEVICE_CODES_TOTAL.with_label_values(&["expired"]).inc();
                Err(AppError::ExpiredToken)
            }
            DeviceCodeState::Pending => Err(AppError::AuthorizationPending),
            DeviceCodeState::Authorized => {
                // Of two racing exchanges only one redeems the row
                let Some(issued) = self.api_keys.redeem_device_code(device_code).await? else {
                    return Err(AppError::InvalidGrant);
                };
                DEVICE_CODES_TOTAL.with_label_values(&["exchanged"]).inc();
                Ok(issued)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ApiKey, MockUserStore};
    use std::collections::HashSet;

    fn stored(expires_in: Duration, authorized: bool) -> DeviceCode {
        let now = Utc::now();
        DeviceCode {
            device_code: "dc".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            key_name: "laptop".to_string(),
            expires_at: now + expires_in,
            authorized_at: authorized.then_some(now),
            user_id: authorized.then(|| "user-1".to_string()),
            created_at: now,
        }
    }

    fn manager(store: MockUserStore) -> DeviceFlowManager {
        let store: Arc<dyn UserStore> = Arc::new(store);
        DeviceFlowManager::new(
            Arc::clone(&store),
            ApiKeyManager::new(store, 500),
            300,
            5,
        )
    }

    #[test]
    fn user_codes_are_formatted_and_unambiguous() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let code = generate_user_code();
            assert_eq!(code.len(), 9);
            assert_eq!(&code[4..5], "-");
            assert!(!code.contains(['0', 'O', 'I', 'L', '1']));
            assert!(code
                .chars()
                .filter(|c| *c != '-')
                .all(|c| USER_CODE_ALPHABET.contains(&(c as u8))));
            assert!(seen.insert(code));
        }
    }

    #[test]
    fn device_codes_are_64_hex_chars() {
        let code = generate_device_code();
        assert_eq!(code.len(), 64);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(code, generate_device_code());
    }

    #[test]
    fn user_code_normalization() {
        assert_eq!(normalize_user_code("abcd-efgh"), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABCDEFGH"), "ABCD-EFGH");
        assert_eq!(normalize_user_code(" abcd efgh "), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABCD\u{2013}EFGH"), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABCD\u{2014}EFGH"), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABCD\u{2212}EFGH"), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABCD\u{FF0D}EFGH"), "ABCD-EFGH");
        assert_eq!(normalize_user_code("ABC"), "ABC");
    }

    #[tokio::test]
    async fn initiate_defaults_key_name() {
        let mut store = MockUserStore::new();
        store
            .expect_create_device_code()
            .withf(|code| code.key_name == "CLI Key" && code.authorized_at.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let auth = manager(store).initiate(Some("  ")).await.unwrap();
        assert_eq!(auth.expires_in, 300);
        assert_eq!(auth.interval, 5);
        assert_eq!(auth.device_code.len(), 64);
        assert_eq!(auth.user_code.len(), 9);
    }

    #[tokio::test]
    async fn initiate_rejects_bad_names() {
        let manager = manager(MockUserStore::new());
        let long = "x".repeat(256);
        assert!(matches!(
            manager.initiate(Some(&long)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn authorize_normalizes_and_reports_failure() {
        let mut store = MockUserStore::new();
        store
            .expect_authorize_device_code()
            .withf(|code, user| code == "ABCD-EFGH" && user == "user-1")
            .returning(|_, _| Ok(true));
        store
            .expect_authorize_device_code()
            .returning(|_, _| Ok(false));

        let manager = manager(store);
        assert!(manager.authorize("abcd\u{2010}efgh", "user-1").await.is_ok());
        assert!(matches!(
            manager.authorize("ZZZZ-ZZZZ", "user-1").await,
            Err(AppError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn exchange_pending_code() {
        let mut store = MockUserStore::new();
        store
            .expect_get_device_code()
            .returning(|_| Ok(Some(stored(Duration::minutes(5), false))));

        assert!(matches!(
            manager(store).exchange("dc").await,
            Err(AppError::AuthorizationPending)
        ));
    }

    #[tokio::test]
    async fn exchange_expired_code_deletes_row() {
        let mut store = MockUserStore::new();
        store
            .expect_get_device_code()
            .returning(|_| Ok(Some(stored(Duration::seconds(-1), true))));
        store
            .expect_delete_device_code()
            .withf(|code| code == "dc")
            .times(1)
            .returning(|_| Ok(()));

        assert!(matches!(
            manager(store).exchange("dc").await,
            Err(AppError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn exchange_unknown_code() {
        let mut store = MockUserStore::new();
        store.expect_get_device_code().returning(|_| Ok(None));
        assert!(matches!(
            manager(store).exchange("nope").await,
            Err(AppError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn exchange_authorized_code_issues_key() {
        let mut store = MockUserStore::new();
        store
            .expect_get_device_code()
            .returning(|_| Ok(Some(stored(Duration::minutes(5), true))));
        store
            .expect_redeem_device_code()
            .withf(|code, _, limit| code == "dc" && *limit == 500)
            .times(1)
            .returning(|_, _, _| {
                Ok(Some((
                    stored(Duration::minutes(5), true),
                    ApiKey {
                        id: "key-1".to_string(),
                        user_id: "user-1".to_string(),
                        name: "laptop".to_string(),
                        created_at: Utc::now(),
                        last_used_at: None,
                    },
                )))
            });

        let issued = manager(store).exchange("dc").await.unwrap();
        assert!(issued.raw_key.starts_with("cfb_"));
        assert_eq!(issued.key.name, "laptop");
    }

    #[tokio::test]
    async fn losing_the_redeem_race_is_invalid_grant() {
        let mut store = MockUserStore::new();
        store
            .expect_get_device_code()
            .returning(|_| Ok(Some(stored(Duration::minutes(5), true))));
        store.expect_redeem_device_code().returning(|_, _, _| Ok(None));

        assert!(matches!(
            manager(store).exchange("dc").await,
            Err(AppError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn exchange_at_key_limit_keeps_code() {
        let mut store = MockUserStore::new();
        store
            .expect_get_device_code()
            .returning(|_| Ok(Some(stored(Duration::minutes(5), true))));
        store
            .expect_redeem_device_code()
            .returning(|_, _, _| Err(AppError::KeyLimitExceeded));
        store.expect_delete_device_code().never();

        assert!(matches!(
            manager(store).exchange("dc").await,
            Err(AppError::KeyLimitExceeded)
        ));
    }
}
