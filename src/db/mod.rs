//! Persistence collaborators.
//!
//! The authentication core reaches the database only through these traits;
//! `PgUserDirectory` and `PgRefreshTokenRepository` are the production
//! implementations, and tests substitute in-memory ones.

pub mod refresh_tokens;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{LoginIdentifier, NewRefreshToken, RefreshTokenRecord, User};

pub use refresh_tokens::PgRefreshTokenRepository;
pub use users::PgUserDirectory;

/// User lookup plus login-failure bookkeeping. The core owns the
/// failed-attempt fields on the user record; nothing else mutates them.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_identifier(&self, identifier: &LoginIdentifier) -> Result<Option<User>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Atomic increment-in-place of the failed-attempt counter plus the
    /// last-failed timestamp. Returns the number of rows affected so a
    /// concurrent delete is observable.
    async fn record_failed_attempt(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64>;

    async fn reset_failed_attempts(&self, user_id: Uuid) -> Result<()>;
}

/// Outcome of an atomic refresh token rotation claim.
#[derive(Debug)]
pub enum RotateOutcome {
    /// This caller won the claim; the old row (now revoked) is returned
    /// and the replacement row was inserted in the same unit.
    Rotated(RefreshTokenRecord),
    /// No row matches the presented hash.
    NotFound,
    /// The row exists but was already revoked (logout, or the other side
    /// of a concurrent double-use).
    AlreadyRevoked,
    /// The row exists but its expiry has passed.
    Expired,
}

/// Durable storage for refresh tokens.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Atomically revoke the active row matching `token_hash` and insert
    /// its replacement. Marking revoked and inserting the new row are one
    /// unit: of two concurrent calls with the same hash, exactly one
    /// observes `Rotated`.
    async fn rotate(
        &self,
        token_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<RotateOutcome>;

    /// Revoke one active token. Returns whether a row was affected.
    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool>;

    /// Revoke every active token for a user. Returns the count revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    async fn count_active(&self, user_id: Uuid) -> Result<u64>;

    /// Revoke the `count` oldest active tokens for a user (FIFO by
    /// created_at). Returns the count revoked.
    async fn revoke_oldest_active(&self, user_id: Uuid, count: u64) -> Result<u64>;

    /// Physically delete rows whose expiry predates `cutoff`. Called by
    /// the retention job only, never by request-time code.
    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
