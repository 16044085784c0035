//! CLI login surfaces
//!
//! - `GET /auth/cli/authorize`: browser hand-off that redirects an API key
//!   to a loopback listener started by the CLI
//! - `POST /auth/device/code`, `POST /auth/device/token`: device flow for
//!   machines without a local browser
//! - `GET /auth/device`, `POST /auth/device/verify`: code entry page

use axum::{
    Form, Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use super::cookies::{self, CLI_REDIRECT_COOKIE, SESSION_COOKIE};
use super::device::{DEFAULT_KEY_NAME, normalize_user_code};
use super::{pages, policy, redirect};
use crate::AppState;
use crate::data::User;
use crate::error::AppError;
use crate::validation;

pub fn cli_router() -> Router<AppState> {
    Router::new()
        .route("/auth/cli/authorize", get(cli_authorize))
        .route("/auth/device/code", post(device_code))
        .route("/auth/device/token", post(device_token))
        .route("/auth/device", get(device_page))
        .route("/auth/device/verify", post(device_verify))
}

/// Signed-in, active, allowlisted user behind the session cookie.
///
/// `Ok(None)` covers no cookie and unknown/expired sessions.
async fn session_user(state: &AppState, jar: &CookieJar) -> Result<Option<User>, AppError> {
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) else {
        return Ok(None);
    };
    let Some(record) = state.sessions.validate_session(&token).await? else {
        return Ok(None);
    };
    if !policy::is_active(record.user.status) {
        return Err(AppError::AccountInactive);
    }
    if !state.policy.is_allowed_domain(&record.user.email) {
        return Err(AppError::DomainNotAllowed);
    }
    Ok(Some(record.user))
}

fn login_redirect_to(target: &str) -> Redirect {
    Redirect::temporary(&format!(
        "/auth/login?redirect={}",
        urlencoding::encode(target)
    ))
}

// =============================================================================
// CLI authorize
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct CliAuthorizeQuery {
    callback: Option<String>,
    name: Option<String>,
    confirmed: Option<String>,
}

impl CliAuthorizeQuery {
    /// This page again, marked as confirmed, for after the login round-trip.
    fn resume_path(&self) -> String {
        let mut path = String::from("/auth/cli/authorize?");
        if let Some(callback) = &self.callback {
            path.push_str(&format!("callback={}&", urlencoding::encode(callback)));
        }
        if let Some(name) = &self.name {
            path.push_str(&format!("name={}&", urlencoding::encode(name)));
        }
        path.push_str("confirmed=1");
        path
    }
}

/// GET /auth/cli/authorize?callback=&name=&confirmed=
///
/// Without a session, or before the user has confirmed which account to
/// use, stores a `cli_redirect` back here and sends the browser to the
/// login selector.
async fn cli_authorize(
    State(state): State<AppState>,
    Query(query): Query<CliAuthorizeQuery>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let secure = state.sessions.secure_cookies();
    let had_cookie = jar.get(SESSION_COOKIE).is_some();
    let user = session_user(&state, &jar).await?;
    let confirmed = query.confirmed.as_deref() == Some("1");

    let user = match user {
        Some(user) if confirmed => user,
        user => {
            let mut jar = jar.add(cookies::flow_cookie(
                CLI_REDIRECT_COOKIE,
                query.resume_path(),
                secure,
            ));
            if user.is_none() && had_cookie {
                jar = jar.add(cookies::removal(SESSION_COOKIE, secure));
            }
            return Ok((jar, Redirect::temporary("/auth/login")).into_response());
        }
    };

    let callback = query
        .callback
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Missing callback parameter".to_string()))?;
    if !redirect::is_localhost_callback(callback) {
        tracing::warn!(callback, user_id = %user.id, "Rejected non-localhost CLI callback");
        return Err(AppError::Validation("Callback must be localhost".to_string()));
    }

    let name = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_KEY_NAME);
    validation::validate_api_key_name(name).map_err(AppError::Validation)?;

    match state.api_keys.issue(&user.id, name, "cli").await {
        Ok(issued) => {
            let target = redirect::with_query_param(callback, "key", &issued.raw_key);
            Ok(Redirect::temporary(&target).into_response())
        }
        Err(AppError::KeyLimitExceeded) => {
            let target = redirect::with_query_param(callback, "error", "api_key_limit_exceeded");
            let html = pages::key_limit(
                state.config.auth.api_key_limit,
                &target,
                state.config.server.frontend_url(),
            );
            Ok((StatusCode::CONFLICT, Html(html)).into_response())
        }
        Err(error) => Err(error),
    }
}

// =============================================================================
// Device flow (JSON)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct DeviceCodeRequest {
    #[serde(default)]
    key_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: i64,
    interval: i64,
}

/// POST /auth/device/code
///
/// An empty or unparseable body falls back to the default key name.
async fn device_code(
    State(state): State<AppState>,
    body: Result<Json<DeviceCodeRequest>, JsonRejection>,
) -> Result<Json<DeviceCodeResponse>, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let authorization = state.device.initiate(request.key_name.as_deref()).await?;

    Ok(Json(DeviceCodeResponse {
        device_code: authorization.device_code,
        user_code: authorization.user_code,
        verification_uri: format!("{}/auth/device", state.config.server.base_url()),
        expires_in: authorization.expires_in,
        interval: authorization.interval,
    }))
}

#[derive(Debug, Deserialize)]
struct DeviceTokenRequest {
    #[serde(default)]
    device_code: String,
}

#[derive(Debug, Serialize)]
struct DeviceTokenResponse {
    access_token: String,
    token_type: &'static str,
}

/// POST /auth/device/token
///
/// Errors use the protocol codes in the JSON `error` field:
/// `authorization_pending`, `expired_token`, `invalid_grant`.
async fn device_token(
    State(state): State<AppState>,
    body: Result<Json<DeviceTokenRequest>, JsonRejection>,
) -> Result<Json<DeviceTokenResponse>, AppError> {
    let Json(request) =
        body.map_err(|_| AppError::Validation("Invalid request body".to_string()))?;

    let issued = state.device.exchange(&request.device_code).await?;
    Ok(Json(DeviceTokenResponse {
        access_token: issued.raw_key,
        token_type: "Bearer",
    }))
}

// =============================================================================
// Device flow (browser)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct DevicePageQuery {
    code: Option<String>,
}

fn device_page_path(code: &str) -> String {
    if code.is_empty() {
        "/auth/device".to_string()
    } else {
        format!("/auth/device?code={}", urlencoding::encode(code))
    }
}

/// GET /auth/device
async fn device_page(
    State(state): State<AppState>,
    Query(query): Query<DevicePageQuery>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let code = query.code.unwrap_or_default();
    if session_user(&state, &jar).await?.is_none() {
        return Ok(login_redirect_to(&device_page_path(&code)).into_response());
    }
    Ok(Html(pages::device_form(&code)).into_response())
}

#[derive(Debug, Deserialize)]
struct DeviceVerifyForm {
    #[serde(default)]
    code: String,
}

/// POST /auth/device/verify
async fn device_verify(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<DeviceVerifyForm>,
) -> Result<Response, AppError> {
    let code = normalize_user_code(&form.code);
    let Some(user) = session_user(&state, &jar).await? else {
        return Ok(login_redirect_to(&device_page_path(&code)).into_response());
    };

    match state.device.authorize(&code, &user.id).await {
        Ok(()) => Ok(Html(pages::device_result(
            true,
            "Device authorized! You can close this window and return to your terminal.",
        ))
        .into_response()),
        Err(AppError::InvalidGrant | AppError::Validation(_)) => Ok((
            StatusCode::BAD_REQUEST,
            Html(pages::device_result(
                false,
                "Invalid or expired code. Please try again.",
            )),
        )
            .into_response()),
        Err(error) => Err(error),
    }
}
