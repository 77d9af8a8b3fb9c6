use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong identifier, wrong password, or a failed account gate. All of
    /// them share one externally visible message; the root cause is logged.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token could not be parsed or its signature did not verify.
    #[error("Malformed token")]
    MalformedToken,

    /// Token passed its natural expiry.
    #[error("Token expired")]
    ExpiredToken,

    /// Token was explicitly invalidated by logout or rotation.
    #[error("Token revoked")]
    RevokedToken,

    /// No refresh token row matches the presented value.
    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // Every credential-adjacent failure collapses to the same
            // opaque 401 so callers cannot enumerate accounts or probe
            // token state. The specific variant is logged where it arose.
            AuthError::InvalidCredentials
            | AuthError::MalformedToken
            | AuthError::ExpiredToken
            | AuthError::RevokedToken
            | AuthError::RefreshTokenNotFound => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AuthError::Database(_) | AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        AuthError::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::MalformedToken,
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
