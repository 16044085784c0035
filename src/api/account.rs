//! Endpoints that act on the authenticated caller

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::{AuthMethod, CurrentUser, MaybeUser};
use crate::data::{ApiKey, UserStatus};
use crate::error::AppError;
use crate::validation;

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub is_admin: bool,
    pub auth_method: AuthMethod,
}

/// GET /api/v1/me
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<MeResponse>, AppError> {
    let user = state
        .store
        .get_user(&identity.user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        avatar_url: user.avatar_url,
        status: user.status,
        is_admin: user.is_admin,
        auth_method: identity.method,
    }))
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: String,
}

/// GET /api/v1/auth/validate
///
/// Lets the CLI confirm a stored key still works.
pub async fn validate_api_key(CurrentUser(identity): CurrentUser) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: true,
        user_id: identity.user_id,
        email: identity.email,
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
}

/// GET /api/v1/auth/status
pub async fn auth_status(MaybeUser(identity): MaybeUser) -> Json<StatusResponse> {
    Json(match identity {
        Some(identity) => StatusResponse {
            authenticated: true,
            email: Some(identity.email),
            auth_method: Some(identity.method),
        },
        None => StatusResponse {
            authenticated: false,
            email: None,
            auth_method: None,
        },
    })
}

// =============================================================================
// API Keys
// =============================================================================

/// GET /api/v1/keys
pub async fn list_keys(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<ApiKey>>, AppError> {
    Ok(Json(state.api_keys.list(&identity.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub id: String,
    /// Raw key; shown once
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// POST /api/v1/keys
pub async fn create_key(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(request): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreateKeyResponse>), AppError> {
    let name = request.name.trim();
    validation::validate_api_key_name(name).map_err(AppError::Validation)?;

    let issued = state.api_keys.issue(&identity.user_id, name, "api").await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateKeyResponse {
            id: issued.key.id,
            key: issued.raw_key,
            name: issued.key.name,
            created_at: issued.key.created_at,
        }),
    ))
}

/// DELETE /api/v1/keys/:id
pub async fn delete_key(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(key_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.api_keys.revoke(&identity.user_id, &key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
