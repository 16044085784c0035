//! Authentication middleware
//!
//! Four modes, applied with `axum::middleware::from_fn_with_state`:
//! - `require_session`: session cookie only
//! - `require_api_key`: `Authorization: Bearer cfb_…` only
//! - `require_session_or_api_key`: session first, API key as fallback
//! - `optional_auth`: API key then session; anonymous requests are let
//!   through unless a domain allowlist is configured
//!
//! On success the resolved `Identity` is stored in request extensions and
//! the downstream handler runs inside an `auth` span.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use tracing::Instrument;

use super::cookies::SESSION_COOKIE;
use super::policy;
use crate::AppState;
use crate::data::User;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Session => "session",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Authenticated caller of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
    pub method: AuthMethod,
}

impl Identity {
    fn from_user(user: &User, method: AuthMethod) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            method,
        }
    }

    /// Identity attached by the middleware, if any.
    pub fn from_parts(parts: &Parts) -> Option<&Identity> {
        parts.extensions.get::<Identity>()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<Result<&str, AppError>> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::InvalidCredential);
    Some(token)
}

/// Status and domain checks shared by every credential type.
fn admit(state: &AppState, user: &User, method: AuthMethod) -> Result<Identity, AppError> {
    if !policy::is_active(user.status) {
        tracing::warn!(user_id = %user.id, method = method.as_str(), "Rejected inactive account");
        return Err(AppError::AccountInactive);
    }
    if !state.policy.is_allowed_domain(&user.email) {
        tracing::warn!(user_id = %user.id, method = method.as_str(), "Rejected email domain");
        return Err(AppError::DomainNotAllowed);
    }
    Ok(Identity::from_user(user, method))
}

async fn session_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let jar = CookieJar::from_headers(headers);
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MissingCredential)?;

    let record = state
        .sessions
        .validate_session(&token)
        .await?
        .ok_or(AppError::InvalidCredential)?;

    admit(state, &record.user, AuthMethod::Session)
}

async fn api_key_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let raw_key = bearer_token(headers).ok_or(AppError::MissingCredential)??;
    let owner = state.api_keys.validate(raw_key).await?;
    admit(state, &owner.user, AuthMethod::ApiKey)
}

/// Credential failures that may fall through to the next method.
fn is_fallthrough(error: &AppError) -> bool {
    matches!(
        error,
        AppError::MissingCredential | AppError::InvalidCredential
    )
}

async fn run_as(identity: Identity, mut request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "auth",
        user.id = %identity.user_id,
        user.email = %identity.email,
        auth.method = identity.method.as_str(),
    );
    crate::metrics::record_auth_attempt(identity.method.as_str(), "success");
    request.extensions_mut().insert(identity);
    next.run(request).instrument(span).await
}

pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = session_identity(&state, request.headers()).await?;
    Ok(run_as(identity, request, next).await)
}

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = api_key_identity(&state, request.headers()).await?;
    Ok(run_as(identity, request, next).await)
}

pub async fn require_session_or_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match session_identity(&state, request.headers()).await {
        Ok(identity) => identity,
        Err(error) if is_fallthrough(&error) => api_key_identity(&state, request.headers())
            .await
            .map_err(|key_error| match key_error {
                // Report the session problem when no key was offered at all
                AppError::MissingCredential => error,
                other => other,
            })?,
        Err(error) => return Err(error),
    };
    Ok(run_as(identity, request, next).await)
}

pub async fn optional_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match api_key_identity(&state, request.headers()).await {
        Ok(identity) => Some(identity),
        Err(error) if error.status().is_server_error() => return Err(error),
        Err(_) => match session_identity(&state, request.headers()).await {
            Ok(identity) => Some(identity),
            Err(error) if error.status().is_server_error() => return Err(error),
            Err(_) => None,
        },
    };

    match identity {
        Some(identity) => Ok(run_as(identity, request, next).await),
        None if state.policy.has_domain_restriction() => {
            tracing::debug!("Anonymous request rejected on domain-restricted deployment");
            Err(AppError::MissingCredential)
        }
        None => Ok(next.run(request).await),
    }
}

/// Extractor for the authenticated caller
///
/// Rejects with 401 when no identity was attached, so a handler mounted
/// without middleware fails closed.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(identity): CurrentUser) -> impl IntoResponse {
///     identity.email
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_parts(parts)
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::MissingCredential)
    }
}

/// Optional identity extractor
///
/// `None` for anonymous requests under `optional_auth`.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(Identity::from_parts(parts).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert("authorization", HeaderValue::from_static("Bearer cfb_abc"));
        assert_eq!(bearer_token(&headers).unwrap().unwrap(), "cfb_abc");

        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(matches!(
            bearer_token(&headers),
            Some(Err(AppError::InvalidCredential))
        ));

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).unwrap().is_err());
    }

    #[test]
    fn only_credential_failures_fall_through() {
        assert!(is_fallthrough(&AppError::MissingCredential));
        assert!(is_fallthrough(&AppError::InvalidCredential));
        assert!(!is_fallthrough(&AppError::AccountInactive));
        assert!(!is_fallthrough(&AppError::DomainNotAllowed));
    }

    #[test]
    fn method_tags() {
        assert_eq!(AuthMethod::Session.as_str(), "session");
        assert_eq!(AuthMethod::ApiKey.as_str(), "api_key");
        assert_eq!(serde_json::to_value(AuthMethod::ApiKey).unwrap(), "api_key");
    }
}
