//! Public auth configuration for the frontend

use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub login_url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthConfigResponse {
    pub providers: Vec<ProviderInfo>,
}

/// GET /api/v1/auth/config
///
/// Enabled login methods, password first.
pub async fn auth_config(State(state): State<AppState>) -> Json<AuthConfigResponse> {
    let mut providers = Vec::new();

    if state.config.providers.password_enabled {
        providers.push(ProviderInfo {
            name: "password".to_string(),
            display_name: "Password".to_string(),
            login_url: "/auth/password/login".to_string(),
        });
    }

    providers.extend(state.providers.iter().map(|provider| ProviderInfo {
        name: provider.name().to_string(),
        display_name: provider.display_name().to_string(),
        login_url: format!("/auth/{}/login", provider.name()),
    }));

    Json(AuthConfigResponse { providers })
}
