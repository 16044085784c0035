//! Authentication core
//!
//! Handles:
//! - Credential validation (GitHub, Google, OIDC, password, API keys)
//! - Web sessions and OAuth CSRF state
//! - Device authorization flow for the CLI
//! - Access policy (domain allowlist, user cap, account status)
//! - Authentication middleware

pub mod api_key;
pub mod callback;
mod cli;
pub mod cookies;
pub mod csrf;
pub mod device;
mod middleware;
mod oauth;
mod pages;
pub mod password;
pub mod policy;
pub mod providers;
pub mod redirect;
pub mod session;

pub use api_key::{ApiKeyManager, IssuedApiKey};
pub use device::{DeviceAuthorization, DeviceFlowManager};
pub use middleware::{
    AuthMethod, CurrentUser, Identity, MaybeUser, optional_auth, require_api_key, require_session,
    require_session_or_api_key,
};
pub use oauth::auth_router;
pub use password::PasswordValidator;
pub use policy::{AccessPolicy, UserCap};
pub use providers::{Provider, ProviderRegistry, VerifiedUser};
pub use session::{IssuedSession, SessionManager};
