// Authentication core: token issuance/validation, refresh rotation,
// revocation tracking, and login-failure state for the CMS backend.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod security;
pub mod services;
pub mod telemetry;

#[cfg(test)]
pub mod tests;

pub use error::{AuthError, Result};

// Re-export commonly used types
pub use config::AuthConfig;
pub use models::{AuthResponse, Principal, RefreshTokenRecord, TokenRefreshResponse, User};
pub use security::jwt::{Claims, IssuedToken, TokenCodec};
pub use security::revocation::RevocationCache;
pub use services::auth_service::AuthService;
pub use services::refresh_store::RefreshTokenStore;
