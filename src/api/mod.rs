//! API layer
//!
//! JSON endpoints under `/api/v1` plus the Prometheus endpoint.
//! Each group is mounted behind the auth middleware mode it needs.

mod account;
mod auth_config;
pub mod metrics;

use axum::{
    Router, middleware,
    routing::{delete, get},
};

use crate::AppState;
use crate::auth::{optional_auth, require_api_key, require_session, require_session_or_api_key};

pub use metrics::metrics_router;

/// Create the `/api/v1` router
///
/// Routes:
/// - GET /auth/config - Enabled providers (public)
/// - GET /auth/status - Caller identity if any (optional auth)
/// - GET /auth/validate - Check an API key (API key)
/// - GET /me - Current user (session or API key)
/// - GET|POST /keys - List / create API keys (session or API key)
/// - DELETE /keys/:id - Revoke an API key (session)
pub fn api_router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/auth/config", get(auth_config::auth_config));

    let optional = Router::new()
        .route("/auth/status", get(account::auth_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let api_key_only = Router::new()
        .route("/auth/validate", get(account::validate_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let session_or_key = Router::new()
        .route("/me", get(account::me))
        .route("/keys", get(account::list_keys).post(account::create_key))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session_or_api_key,
        ));

    let session_only = Router::new()
        .route("/keys/:id", delete(account::delete_key))
        .route_layer(middleware::from_fn_with_state(state, require_session));

    public
        .merge(optional)
        .merge(api_key_only)
        .merge(session_or_key)
        .merge(session_only)
}
