//! Browser login routes
//!
//! Provider selection, OAuth initiation and callback, password login,
//! logout. The callback itself is `callback::complete_login`.

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::callback::{self, CallbackQuery};
use super::cookies::{self, EXPECTED_EMAIL_COOKIE, POST_LOGIN_REDIRECT_COOKIE};
use super::pages::{self, ProviderLink};
use super::{cli, csrf, redirect};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::record_auth_attempt;
use crate::validation;

/// Generic message for every password failure a caller could probe
const INVALID_LOGIN: &str = "Invalid email or password";

/// Create authentication router
///
/// Routes:
/// - GET /auth/login - Provider selector
/// - GET /auth/:provider/login - Redirect to provider
/// - GET /auth/:provider/callback - OAuth callback
/// - POST /auth/password/login - Email/password login
/// - GET|POST /auth/logout - Logout
/// - CLI and device-flow routes from `cli::cli_router`
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_selector))
        .route("/auth/password/login", post(password_login))
        .route("/auth/:provider/login", get(provider_login))
        .route("/auth/:provider/callback", get(provider_callback))
        .route("/auth/logout", get(logout).post(logout))
        .merge(cli::cli_router())
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    redirect: Option<String>,
    email: Option<String>,
    error: Option<String>,
}

impl LoginQuery {
    /// Share-link email hint, when it is a well-formed address.
    fn expected_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(validation::normalize_email)
            .filter(|email| validation::is_valid_email(email))
    }

    fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref().filter(|r| !r.is_empty())
    }
}

// =============================================================================
// Login Selector
// =============================================================================

/// GET /auth/login
async fn login_selector(State(state): State<AppState>, Query(query): Query<LoginQuery>) -> Html<String> {
    let expected_email = query.expected_email();

    let mut params = Vec::new();
    if let Some(target) = query.redirect() {
        params.push(format!("redirect={}", urlencoding::encode(target)));
    }
    if let Some(email) = &expected_email {
        params.push(format!("email={}", urlencoding::encode(email)));
    }
    let suffix = if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    };

    let providers: Vec<_> = state
        .providers
        .iter()
        .map(|p| ProviderLink {
            name: p.name(),
            display_name: p.display_name(),
        })
        .collect();

    Html(pages::login_selector(
        &providers,
        state.config.providers.password_enabled,
        &suffix,
        expected_email.as_deref(),
        query.error.as_deref(),
        query.redirect(),
    ))
}

// =============================================================================
// OAuth
// =============================================================================

/// GET /auth/:provider/login
///
/// Sets the CSRF state cookie (plus post-login redirect and expected email
/// when given) and redirects to the provider.
async fn provider_login(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let provider = state.providers.get(&name).ok_or(AppError::NotFound)?;
    let secure = state.sessions.secure_cookies();

    let (mut jar, csrf_state) = csrf::issue(jar, secure);

    if let Some(target) = query.redirect() {
        let target = redirect::sanitize_relative_redirect(target, "/");
        jar = jar.add(cookies::flow_cookie(POST_LOGIN_REDIRECT_COOKIE, target, secure));
    }

    let expected_email = query.expected_email();
    if let Some(email) = &expected_email {
        jar = jar.add(cookies::flow_cookie(EXPECTED_EMAIL_COOKIE, email.clone(), secure));
    }

    match provider
        .authorize_url(&csrf_state, expected_email.as_deref())
        .await
    {
        Ok(url) => Ok((jar, Redirect::temporary(&url)).into_response()),
        Err(error @ AppError::Discovery(_)) => {
            record_auth_attempt(provider.name(), error.code());
            let target = callback::error_redirect(
                state.config.server.frontend_url(),
                "oidc_error",
                "Single sign-on is currently unavailable. Please try again later.",
            );
            Ok((jar, Redirect::temporary(&target)).into_response())
        }
        Err(error) => Err(error),
    }
}

/// GET /auth/:provider/callback
async fn provider_callback(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let provider = state.providers.get(&name).ok_or(AppError::NotFound)?;
    Ok(callback::complete_login(&state, provider.as_ref(), jar, query).await)
}

// =============================================================================
// Password
// =============================================================================

#[derive(Debug, Deserialize)]
struct PasswordForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    redirect: String,
}

fn login_error(message: &str, redirect: &str) -> Redirect {
    let mut target = format!("/login?error={}", urlencoding::encode(message));
    if !redirect.is_empty() {
        target.push_str(&format!("&redirect={}", urlencoding::encode(redirect)));
    }
    Redirect::to(&target)
}

/// POST /auth/password/login
async fn password_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> Result<Response, AppError> {
    if !state.config.providers.password_enabled {
        return Err(AppError::NotFound);
    }

    let email = validation::normalize_email(&form.email);
    if !validation::is_valid_email(&email) {
        return Ok(login_error("Invalid email address", &form.redirect).into_response());
    }
    if form.password.is_empty() {
        return Ok(login_error("Password is required", &form.redirect).into_response());
    }

    // Password login never creates users, so only the domain rule applies
    let checked = if state.policy.is_allowed_domain(&email) {
        state.passwords.authenticate(&email, &form.password).await
    } else {
        Err(AppError::DomainNotAllowed)
    };

    let user = match checked {
        Ok(user) => user,
        Err(error) => {
            record_auth_attempt("password", error.code());
            let message = match &error {
                AppError::DomainNotAllowed => {
                    tracing::warn!(email = %email, "Email domain not permitted");
                    "Your email domain is not permitted. Contact your administrator."
                }
                AppError::InvalidCredential | AppError::AccountLocked | AppError::AccountInactive => {
                    tracing::warn!(email = %email, code = error.code(), "Failed password login");
                    INVALID_LOGIN
                }
                _ => {
                    tracing::error!(%error, "Password authentication error");
                    "An error occurred. Please try again."
                }
            };
            return Ok(login_error(message, &form.redirect).into_response());
        }
    };

    let jar = state.sessions.login(jar, &user.id).await?;
    record_auth_attempt("password", "success");
    tracing::info!(user_id = %user.id, "Password login successful");

    let frontend = state.config.server.frontend_url();
    let (jar, target) = if form.redirect.is_empty() {
        callback::post_login_target(jar, frontend, None, state.sessions.secure_cookies())
    } else {
        (jar, redirect::resolve_redirect(&form.redirect, frontend))
    };
    Ok((jar, Redirect::to(&target)).into_response())
}

// =============================================================================
// Logout
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct LogoutQuery {
    redirect: Option<String>,
}

/// GET|POST /auth/logout
///
/// The session cookie is cleared even if the store delete fails.
async fn logout(
    State(state): State<AppState>,
    Query(query): Query<LogoutQuery>,
    jar: CookieJar,
) -> impl IntoResponse {
    let jar = state.sessions.logout(jar).await;
    let target = redirect::resolve_logout_redirect(
        query.redirect.as_deref(),
        state.config.server.frontend_url(),
    );
    (jar, Redirect::temporary(&target))
}
