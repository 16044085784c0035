//! Cookie names and builders shared by the login flows

use axum_extra::extract::cookie::{Cookie, SameSite};

/// Opaque session token (lifetime = `auth.session_max_age`)
pub const SESSION_COOKIE: &str = "confab_session";
/// CSRF state for an in-flight OAuth login
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";
/// Relative path to return to after login
pub const POST_LOGIN_REDIRECT_COOKIE: &str = "post_login_redirect";
/// Share-link email hint
pub const EXPECTED_EMAIL_COOKIE: &str = "expected_email";
/// CLI authorize URL to resume after login
pub const CLI_REDIRECT_COOKIE: &str = "cli_redirect";

/// Lifetime of every login-flow cookie except the session itself
pub const FLOW_COOKIE_MAX_AGE_SECS: i64 = 300;

/// `HttpOnly; SameSite=Lax; Path=/` cookie with an explicit max age.
pub fn build(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Short-lived login-flow cookie.
pub fn flow_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    build(name, value, FLOW_COOKIE_MAX_AGE_SECS, secure)
}

/// A `Set-Cookie` that expires `name` immediately, with the same
/// attributes the cookie was set with.
pub fn removal(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build();
    cookie.make_removal();
    cookie
}
