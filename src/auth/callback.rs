//! OAuth callback pipeline shared by every provider
//!
//! state check -> code exchange -> verified profile -> email checks ->
//! access policy -> account linking -> session -> redirect

use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::cookies::{
    self, CLI_REDIRECT_COOKIE, EXPECTED_EMAIL_COOKIE, POST_LOGIN_REDIRECT_COOKIE,
};
use super::providers::Provider;
use super::{csrf, policy, redirect};
use crate::AppState;
use crate::data::User;
use crate::error::AppError;
use crate::metrics::record_auth_attempt;
use crate::validation;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Read a cookie and queue its removal.
pub(crate) fn take_cookie(
    jar: CookieJar,
    name: &'static str,
    secure: bool,
) -> (CookieJar, Option<String>) {
    match jar.get(name).map(|c| c.value().to_owned()) {
        Some(value) => (
            jar.add(cookies::removal(name, secure)),
            Some(value).filter(|v| !v.is_empty()),
        ),
        None => (jar, None),
    }
}

/// `{frontend}?error=<category>&error_description=<text>`
pub fn error_redirect(frontend_url: &str, category: &str, description: &str) -> String {
    format!(
        "{frontend_url}?error={category}&error_description={}",
        urlencoding::encode(description)
    )
}

/// Where to send a freshly signed-in browser.
///
/// A pending CLI authorization wins, then the stored post-login target,
/// then the frontend root. `mismatch` is `(expected, actual)` from the
/// share-link email check.
pub(crate) fn post_login_target(
    jar: CookieJar,
    frontend_url: &str,
    mismatch: Option<(&str, &str)>,
    secure: bool,
) -> (CookieJar, String) {
    let (jar, cli) = take_cookie(jar, CLI_REDIRECT_COOKIE, secure);
    let (jar, stored) = take_cookie(jar, POST_LOGIN_REDIRECT_COOKIE, secure);

    if let Some(cli) = cli {
        if redirect::is_cli_redirect(&cli) {
            return (jar, cli);
        }
        tracing::warn!(redirect_url = %cli, "Ignoring invalid cli_redirect cookie");
    }

    let target = match stored {
        Some(path) => redirect::resolve_redirect(&path, frontend_url),
        None => frontend_url.to_string(),
    };
    let target = match mismatch {
        Some((expected, actual)) => redirect::append_email_mismatch(&target, expected, actual),
        None => target,
    };
    (jar, target)
}

/// Map a pipeline failure to its redirect category and message.
fn describe_failure(provider: &dyn Provider, error: &AppError) -> (String, String) {
    let display = provider.display_name();
    match error {
        AppError::UpstreamProvider(_) | AppError::HttpClient(_) => (
            format!("{}_error", provider.name()),
            format!("Failed to complete {display} authentication. Please try again."),
        ),
        AppError::Discovery(_) => (
            "oidc_error".to_string(),
            format!("{display} is currently unavailable. Please try again later."),
        ),
        AppError::Validation(_) => (
            format!("{}_error", provider.name()),
            format!("{display} returned an invalid email address."),
        ),
        AppError::EmailUnverified => (
            "email_unverified".to_string(),
            format!("Please verify your email address with {display} and try again."),
        ),
        AppError::DomainNotAllowed => (
            "access_denied".to_string(),
            "Your email domain is not permitted. Contact your administrator.".to_string(),
        ),
        AppError::UserCapReached => ("access_denied".to_string(), error.to_string()),
        AppError::AccountInactive => (
            "access_denied".to_string(),
            "Your account has been deactivated. Contact your administrator.".to_string(),
        ),
        _ => (
            "server_error".to_string(),
            "An error occurred. Please try again later.".to_string(),
        ),
    }
}

/// Everything between the state check and session issuance.
async fn resolve_user(app: &AppState, provider: &dyn Provider, code: &str) -> Result<User, AppError> {
    let access_token = provider.exchange_code(code).await?;
    let mut profile = provider.fetch_verified_user(&access_token).await?;

    profile.email = validation::normalize_email(&profile.email);
    if !validation::is_valid_email(&profile.email) {
        return Err(AppError::Validation("invalid email".to_string()));
    }

    if let Err(error) = app.policy.check_login(&profile.email).await {
        tracing::warn!(
            provider = provider.name(),
            email = %profile.email,
            code = error.code(),
            "Login denied by access policy"
        );
        return Err(error);
    }

    let user = app
        .store
        .find_or_create_user_by_oauth(&profile.into_identity(provider.name()))
        .await?;

    if !policy::is_active(user.status) {
        return Err(AppError::AccountInactive);
    }
    Ok(user)
}

/// Finish an OAuth login for `provider`.
pub async fn complete_login(
    app: &AppState,
    provider: &dyn Provider,
    jar: CookieJar,
    query: CallbackQuery,
) -> Response {
    let secure = app.sessions.secure_cookies();
    let (jar, verified) = csrf::verify_and_clear(jar, query.state.as_deref(), secure);
    if let Err(error) = verified {
        record_auth_attempt(provider.name(), "invalid_state");
        return (jar, error).into_response();
    }

    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return (jar, AppError::Validation("Missing code parameter".to_string())).into_response();
    };

    let frontend = app.config.server.frontend_url();

    let user = match resolve_user(app, provider, &code).await {
        Ok(user) => user,
        Err(error) => {
            if error.status().is_server_error() {
                tracing::error!(provider = provider.name(), %error, "OAuth login failed");
            }
            record_auth_attempt(provider.name(), error.code());
            let (category, description) = describe_failure(provider, &error);
            let target = error_redirect(frontend, &category, &description);
            return (jar, Redirect::temporary(&target)).into_response();
        }
    };

    let jar = match app.sessions.login(jar.clone(), &user.id).await {
        Ok(jar) => jar,
        Err(error) => return (jar, error).into_response(),
    };
    record_auth_attempt(provider.name(), "success");
    tracing::info!(provider = provider.name(), user_id = %user.id, "OAuth login successful");

    let (jar, expected) = take_cookie(jar, EXPECTED_EMAIL_COOKIE, secure);
    let mismatch = expected
        .as_deref()
        .filter(|expected| !expected.eq_ignore_ascii_case(&user.email));
    if let Some(expected) = mismatch {
        tracing::warn!(
            provider = provider.name(),
            expected_email = %expected,
            actual_email = %user.email,
            "OAuth email mismatch"
        );
    }

    let (jar, target) = post_login_target(
        jar,
        frontend,
        mismatch.map(|e| (e, user.email.as_str())),
        secure,
    );
    (jar, Redirect::temporary(&target)).into_response()
}
