//! Credential authentication, token refresh, and logout.
//!
//! Every credential-adjacent failure surfaces as `InvalidCredentials`; the
//! internal reason (unknown identifier, password mismatch, account gate)
//! is logged but never returned, so callers cannot enumerate accounts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;
use validator::Validate;

use crate::db::UserDirectory;
use crate::error::{AuthError, Result};
use crate::models::{AuthResponse, LoginIdentifier, LoginRequest, Principal, TokenRefreshResponse, User};
use crate::security::jwt::TokenCodec;
use crate::security::password::PasswordVerifier;
use crate::security::revocation::RevocationCache;
use crate::services::refresh_store::RefreshTokenStore;

/// Cap on tracked unknown-identifier entries. Past this the map is pruned
/// of stale entries; if still full, new entries are dropped rather than
/// letting unauthenticated traffic grow memory without bound.
const UNKNOWN_FAILURE_CAP: usize = 10_000;

fn unknown_failure_ttl() -> Duration {
    Duration::hours(1)
}

struct UnknownFailure {
    attempts: u32,
    last_seen: DateTime<Utc>,
}

pub struct AuthService {
    codec: Arc<TokenCodec>,
    users: Arc<dyn UserDirectory>,
    passwords: Arc<dyn PasswordVerifier>,
    refresh_tokens: RefreshTokenStore,
    revocations: RevocationCache,
    /// In-memory failure tally for identifiers that match no account.
    /// Deliberately not persisted: writing rows keyed by attacker-chosen
    /// identifiers would hand unauthenticated traffic a table to fill.
    unknown_failures: DashMap<String, UnknownFailure>,
}

impl AuthService {
    pub fn new(
        codec: Arc<TokenCodec>,
        users: Arc<dyn UserDirectory>,
        passwords: Arc<dyn PasswordVerifier>,
        refresh_tokens: RefreshTokenStore,
        revocations: RevocationCache,
    ) -> Self {
        Self {
            codec,
            users,
            passwords,
            refresh_tokens,
            revocations,
            unknown_failures: DashMap::new(),
        }
    }

    pub fn revocations(&self) -> RevocationCache {
        self.revocations.clone()
    }

    /// Authenticate a login request and mint a token pair.
    ///
    /// Password verification runs before the account gates, so a caller
    /// holding the wrong password learns nothing about lockout or status.
    pub async fn authenticate(&self, request: &LoginRequest) -> Result<AuthResponse> {
        request.validate()?;
        let identifier = request.identifier()?;

        let user = match self.users.find_by_identifier(&identifier).await? {
            Some(user) => user,
            None => {
                self.note_unknown_identifier(&identifier);
                tracing::warn!(kind = identifier.kind(), "login failed: unknown identifier");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.passwords.matches(&request.password, &user.password_hash)? {
            self.users.record_failed_attempt(user.id, Utc::now()).await?;
            tracing::warn!(user_id = %user.id, "login failed: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if let Err(reason) = user.account_gate(Utc::now()) {
            tracing::warn!(user_id = %user.id, reason, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        self.users.reset_failed_attempts(user.id).await?;

        let response = self.mint_token_pair(&user).await?;
        tracing::info!(user_id = %user.id, "user logged in");
        Ok(response)
    }

    /// Exchange a refresh token for a fresh access token and a replacement
    /// refresh token. The presented token is single-use; reuse after
    /// rotation is rejected as revoked.
    pub async fn refresh(&self, raw_refresh: &str) -> Result<TokenRefreshResponse> {
        let (user_id, replacement) = self.refresh_tokens.validate_and_rotate(raw_refresh).await?;

        let user = match self.users.find_by_id(user_id).await? {
            Some(user) => user,
            None => {
                tracing::warn!(%user_id, "refresh rejected: user no longer exists");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if let Err(reason) = user.account_gate(Utc::now()) {
            // The replacement was persisted by the rotation; take it back
            // so a gated account is not left holding a live token.
            self.refresh_tokens.revoke(&replacement.token).await?;
            tracing::warn!(user_id = %user.id, reason, "refresh rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let access = self
            .codec
            .issue_access(&user.username, user.id, &user.roles)?;

        Ok(TokenRefreshResponse {
            access_token: access.token,
            refresh_token: replacement.token,
            expires_in: self.codec.access_ttl_secs(),
        })
    }

    /// Log out: blocklist the access token until its natural expiry and
    /// revoke refresh tokens (one, or all of the user's devices).
    ///
    /// An already-expired access token is not an error; there is nothing
    /// left to blocklist, but a supplied refresh token is still revoked.
    pub async fn logout(
        &self,
        access_token: &str,
        raw_refresh: Option<&str>,
        all_devices: bool,
    ) -> Result<()> {
        match self.codec.validate(access_token) {
            Ok(claims) => {
                self.revocations.revoke(&claims.jti, claims.expires_at());
                if all_devices {
                    self.refresh_tokens.revoke_all(claims.user_id).await?;
                } else if let Some(raw) = raw_refresh {
                    self.refresh_tokens.revoke(raw).await?;
                }
                tracing::info!(user_id = %claims.user_id, all_devices, "user logged out");
                Ok(())
            }
            Err(AuthError::ExpiredToken) => {
                if all_devices {
                    if let Some(raw) = raw_refresh {
                        let claims = self.codec.validate(raw)?;
                        self.refresh_tokens.revoke_all(claims.user_id).await?;
                        tracing::info!(user_id = %claims.user_id, "user logged out everywhere with expired access token");
                        return Ok(());
                    }
                }
                if let Some(raw) = raw_refresh {
                    self.refresh_tokens.revoke(raw).await?;
                }
                tracing::debug!("logout with already-expired access token");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn mint_token_pair(&self, user: &User) -> Result<AuthResponse> {
        let access = self
            .codec
            .issue_access(&user.username, user.id, &user.roles)?;
        let refresh = self.refresh_tokens.issue(user.id, &user.username).await?;

        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.codec.access_ttl_secs(),
            principal: Principal {
                user_id: user.id,
                subject: user.username.clone(),
                authorities: user.roles.clone(),
            },
        })
    }

    fn note_unknown_identifier(&self, identifier: &LoginIdentifier) {
        let now = Utc::now();

        if self.unknown_failures.len() >= UNKNOWN_FAILURE_CAP {
            let cutoff = now - unknown_failure_ttl();
            self.unknown_failures
                .retain(|_, failure| failure.last_seen > cutoff);
            if self.unknown_failures.len() >= UNKNOWN_FAILURE_CAP {
                tracing::warn!("unknown-identifier tracker full, dropping entry");
                return;
            }
        }

        let mut entry = self
            .unknown_failures
            .entry(identifier.key())
            .or_insert(UnknownFailure {
                attempts: 0,
                last_seen: now,
            });
        entry.attempts += 1;
        entry.last_seen = now;
        tracing::debug!(
            kind = identifier.kind(),
            attempts = entry.attempts,
            "unknown identifier attempt recorded"
        );
    }

    #[cfg(test)]
    pub(crate) fn unknown_failure_count(&self, identifier: &LoginIdentifier) -> u32 {
        self.unknown_failures
            .get(&identifier.key())
            .map(|f| f.attempts)
            .unwrap_or(0)
    }
}
