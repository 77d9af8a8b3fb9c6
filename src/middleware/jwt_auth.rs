//! Per-request bearer token authentication.
//!
//! The middleware never rejects a request itself: with a valid token it
//! attaches a [`CurrentUser`] extension, without one it passes the request
//! through unauthenticated and lets route-level authorization decide.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use uuid::Uuid;

use crate::db::UserDirectory;
use crate::security::jwt::{TokenCodec, TOKEN_TYPE_ACCESS};
use crate::security::revocation::RevocationCache;

/// Shared state for [`authenticate_request`], wired with
/// `axum::middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct RequestAuthState {
    pub codec: Arc<TokenCodec>,
    pub revocations: RevocationCache,
    pub users: Arc<dyn UserDirectory>,
}

/// Authenticated identity attached to the request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub subject: String,
    pub token_id: String,
    pub authorities: Vec<String>,
}

pub async fn authenticate_request(
    State(state): State<RequestAuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    // CORS preflights carry no credentials.
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    if let Some(current) = resolve_identity(&state, request.headers()).await {
        tracing::debug!(user_id = %current.user_id, "request authenticated");
        request.extensions_mut().insert(current);
    }

    next.run(request).await
}

/// Walk the full acceptance chain; any failed step leaves the request
/// unauthenticated.
async fn resolve_identity(state: &RequestAuthState, headers: &HeaderMap) -> Option<CurrentUser> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;

    let claims = match state.codec.validate(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "request token rejected");
            return None;
        }
    };

    if claims.token_type != TOKEN_TYPE_ACCESS {
        tracing::warn!(user_id = %claims.user_id, "non-access token presented as bearer credential");
        return None;
    }

    if state.revocations.is_revoked(&claims.jti) {
        tracing::debug!(user_id = %claims.user_id, "revoked token presented");
        return None;
    }

    let user = match state.users.find_by_id(claims.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(user_id = %claims.user_id, "token for a user that no longer exists");
            return None;
        }
        Err(e) => {
            // Fail closed on storage errors rather than trusting the token alone.
            tracing::error!(error = %e, "user lookup failed during request authentication");
            return None;
        }
    };

    if user.username != claims.sub {
        tracing::warn!(user_id = %user.id, "token subject does not match current username");
        return None;
    }

    if let Err(reason) = user.account_gate(Utc::now()) {
        tracing::debug!(user_id = %user.id, reason, "request from gated account");
        return None;
    }

    Some(CurrentUser {
        user_id: user.id,
        subject: user.username,
        token_id: claims.jti,
        authorities: claims.authorities,
    })
}
