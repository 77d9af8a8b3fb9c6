//! Postgres-backed refresh token storage.
//!
//! The rotation claim is a single conditional UPDATE, so row-level
//! atomicity decides the winner of a concurrent double-use; the claim and
//! the replacement INSERT share one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{RefreshTokenRepository, RotateOutcome};
use crate::error::Result;
use crate::models::{NewRefreshToken, RefreshTokenRecord};

const TOKEN_COLUMNS: &str = r#"
    id, user_id, token_hash, expires_at, created_at, last_used_at,
    revoked, revoked_at, created_by, updated_by
"#;

#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, expires_at, revoked, created_at, created_by)
            VALUES (gen_random_uuid(), $1, $2, $3, FALSE, CURRENT_TIMESTAMP, $4)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(&token.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn rotate(
        &self,
        token_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let mut tx = self.pool.begin().await?;

        // The conditional UPDATE is the claim: only one of two concurrent
        // calls can match the still-active row.
        let old = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE,
                revoked_at = CURRENT_TIMESTAMP,
                last_used_at = CURRENT_TIMESTAMP,
                updated_by = 'rotation'
            WHERE token_hash = $1
              AND revoked = FALSE
              AND expires_at > CURRENT_TIMESTAMP
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let old = match old {
            Some(old) => old,
            None => {
                // Lost the claim or the row never qualified; classify why.
                let existing = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
                ))
                .bind(token_hash)
                .fetch_optional(&mut *tx)
                .await?;

                tx.rollback().await?;
                return Ok(match existing {
                    None => RotateOutcome::NotFound,
                    Some(record) if record.revoked => RotateOutcome::AlreadyRevoked,
                    Some(_) => RotateOutcome::Expired,
                });
            }
        };

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, expires_at, revoked, created_at, created_by)
            VALUES (gen_random_uuid(), $1, $2, $3, FALSE, CURRENT_TIMESTAMP, 'rotation')
            "#,
        )
        .bind(old.user_id)
        .bind(new_hash)
        .bind(new_expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RotateOutcome::Rotated(old))
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = CURRENT_TIMESTAMP, updated_by = 'logout'
            WHERE token_hash = $1 AND revoked = FALSE
            "#,
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = CURRENT_TIMESTAMP, updated_by = 'logout-all'
            WHERE user_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_active(&self, user_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM refresh_tokens
            WHERE user_id = $1 AND revoked = FALSE AND expires_at > CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn revoke_oldest_active(&self, user_id: Uuid, count: u64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = CURRENT_TIMESTAMP, updated_by = 'session-limit'
            WHERE id IN (
                SELECT id FROM refresh_tokens
                WHERE user_id = $1 AND revoked = FALSE AND expires_at > CURRENT_TIMESTAMP
                ORDER BY created_at ASC
                LIMIT $2
            )
            "#,
        )
        .bind(user_id)
        .bind(count as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
