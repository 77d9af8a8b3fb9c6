//! Refresh token issuance, rotation, and retention.
//!
//! Raw refresh tokens are signed JWTs carrying the refresh type marker;
//! only their SHA-256 hash is ever persisted, so a raw value is
//! unrecoverable after it leaves this module.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::{RefreshTokenRepository, RotateOutcome};
use crate::error::{AuthError, Result};
use crate::models::NewRefreshToken;
use crate::security::jwt::{IssuedToken, TokenCodec};

/// SHA-256 hex digest of a raw token value.
pub fn token_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    codec: Arc<TokenCodec>,
    max_sessions_per_user: u64,
}

impl RefreshTokenStore {
    pub fn new(
        repo: Arc<dyn RefreshTokenRepository>,
        codec: Arc<TokenCodec>,
        max_sessions_per_user: u64,
    ) -> Self {
        Self {
            repo,
            codec,
            max_sessions_per_user,
        }
    }

    /// Issue and persist a refresh token for a user. The raw value is
    /// returned exactly once; only its hash is stored.
    ///
    /// If the user is already at the concurrent-session limit, the oldest
    /// active tokens are revoked first (FIFO by creation time) rather
    /// than failing the login.
    pub async fn issue(&self, user_id: Uuid, subject: &str) -> Result<IssuedToken> {
        let active = self.repo.count_active(user_id).await?;
        if active >= self.max_sessions_per_user {
            let excess = active + 1 - self.max_sessions_per_user;
            let evicted = self.repo.revoke_oldest_active(user_id, excess).await?;
            tracing::info!(
                %user_id,
                evicted,
                limit = self.max_sessions_per_user,
                "session limit reached, oldest refresh tokens revoked"
            );
        }

        let issued = self.codec.issue_refresh(subject, user_id)?;
        self.repo
            .insert(NewRefreshToken {
                user_id,
                token_hash: token_hash(&issued.token),
                expires_at: issued.expires_at,
                created_by: Some("login".to_string()),
            })
            .await?;

        Ok(issued)
    }

    /// Exchange a raw refresh token for a replacement, revoking the old
    /// one in the same atomic unit. A concurrent double-use of the same
    /// token lets exactly one caller through; the other sees
    /// `RevokedToken`.
    pub async fn validate_and_rotate(&self, raw: &str) -> Result<(Uuid, IssuedToken)> {
        let claims = self.codec.validate(raw)?;
        if claims.token_type != crate::security::jwt::TOKEN_TYPE_REFRESH {
            tracing::warn!("non-refresh token presented for rotation");
            return Err(AuthError::MalformedToken);
        }

        let replacement = self.codec.issue_refresh(&claims.sub, claims.user_id)?;

        match self
            .repo
            .rotate(
                &token_hash(raw),
                &token_hash(&replacement.token),
                replacement.expires_at,
            )
            .await?
        {
            RotateOutcome::Rotated(old) => {
                tracing::info!(user_id = %old.user_id, "refresh token rotated");
                Ok((old.user_id, replacement))
            }
            RotateOutcome::NotFound => Err(AuthError::RefreshTokenNotFound),
            RotateOutcome::AlreadyRevoked => {
                tracing::warn!(user_id = %claims.user_id, "rotation of an already revoked refresh token");
                Err(AuthError::RevokedToken)
            }
            RotateOutcome::Expired => Err(AuthError::ExpiredToken),
        }
    }

    /// Targeted revocation of one token by its raw value.
    pub async fn revoke(&self, raw: &str) -> Result<bool> {
        self.repo.revoke_by_hash(&token_hash(raw)).await
    }

    /// Targeted revocation when only the stored hash is known.
    pub async fn revoke_by_hash(&self, hash: &str) -> Result<bool> {
        self.repo.revoke_by_hash(hash).await
    }

    /// Revoke every active token for a user (logout-all-devices).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let count = self.repo.revoke_all_for_user(user_id).await?;
        tracing::info!(%user_id, count, "all refresh tokens revoked");
        Ok(count)
    }

    pub async fn count_active(&self, user_id: Uuid) -> Result<u64> {
        self.repo.count_active(user_id).await
    }

    /// Physically delete rows expired before `cutoff`. Retention-job
    /// entry point; never called from request handling.
    pub async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.repo.delete_expired_before(cutoff).await
    }

    /// Spawn the retention job: every `interval`, delete rows that have
    /// been expired for longer than `retention`. Failures are logged and
    /// retried on the next tick.
    pub fn spawn_cleanup(&self, interval: StdDuration, retention: Duration) -> CleanupHandle {
        let store = self.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cutoff = Utc::now() - retention;
                        match store.delete_expired_before(cutoff).await {
                            Ok(deleted) => {
                                tracing::debug!(deleted, %cutoff, "refresh token retention cleanup");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "refresh token cleanup failed, will retry");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("refresh token cleanup stopping");
                        break;
                    }
                }
            }
        });

        CleanupHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle for the retention job task.
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(StdDuration::from_secs(5), self.handle)
            .await
            .is_err()
        {
            tracing::warn!("refresh token cleanup did not stop within grace period");
        }
    }
}
