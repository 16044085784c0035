//! OAuth CSRF state
//!
//! The state token lives only in the `oauth_state` cookie and the
//! provider's echo of it in the callback query. Nothing is persisted
//! server-side; the cookie is cleared on every callback, valid or not.

use axum_extra::extract::CookieJar;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

use super::cookies::{self, OAUTH_STATE_COOKIE};
use crate::error::AppError;

const STATE_BYTES: usize = 32;

/// 32 random bytes, base64url without padding.
pub fn generate_state() -> String {
    let mut bytes = [0_u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a state token and store it in a short-lived cookie.
pub fn issue(jar: CookieJar, secure: bool) -> (CookieJar, String) {
    let state = generate_state();
    let jar = jar.add(cookies::flow_cookie(OAUTH_STATE_COOKIE, state.clone(), secure));
    (jar, state)
}

/// Validate the callback's `state` against the cookie and clear the cookie.
///
/// Fails with `InvalidState` when either side is missing/empty or they differ.
pub fn verify_and_clear(
    jar: CookieJar,
    query_state: Option<&str>,
    secure: bool,
) -> (CookieJar, Result<(), AppError>) {
    let cookie_state = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|cookie| cookie.value().to_owned());
    let jar = jar.add(cookies::removal(OAUTH_STATE_COOKIE, secure));

    let result = match (cookie_state.as_deref(), query_state) {
        (Some(expected), Some(presented))
            if !expected.is_empty() && constant_time_eq(expected.as_bytes(), presented.as_bytes()) =>
        {
            Ok(())
        }
        _ => {
            tracing::warn!(
                cookie_present = cookie_state.is_some(),
                query_present = query_state.is_some_and(|s| !s.is_empty()),
                "OAuth state validation failed"
            );
            Err(AppError::InvalidState)
        }
    };

    (jar, result)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
