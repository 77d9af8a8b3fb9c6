//! Postgres-backed user lookup and login-failure updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::UserDirectory;
use crate::error::{AuthError, Result};
use crate::models::{AccountStatus, LoginIdentifier, User};

const USER_COLUMNS: &str = r#"
    id, username, email, country_code, mobile, password_hash, status,
    locked_until, password_changed_at, failed_login_attempts,
    last_failed_login_at, roles
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: Option<String>,
    country_code: Option<String>,
    mobile: Option<String>,
    password_hash: String,
    status: String,
    locked_until: Option<DateTime<Utc>>,
    password_changed_at: Option<DateTime<Utc>>,
    failed_login_attempts: i32,
    last_failed_login_at: Option<DateTime<Utc>>,
    roles: Vec<String>,
}

impl TryFrom<UserRow> for User {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<User> {
        let status = AccountStatus::parse(&row.status)
            .ok_or_else(|| AuthError::Database(format!("unknown account status: {}", row.status)))?;

        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            country_code: row.country_code,
            mobile: row.mobile,
            password_hash: row.password_hash,
            status,
            locked_until: row.locked_until,
            password_changed_at: row.password_changed_at,
            failed_login_attempts: row.failed_login_attempts,
            last_failed_login_at: row.last_failed_login_at,
            roles: row.roles,
        })
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_identifier(&self, identifier: &LoginIdentifier) -> Result<Option<User>> {
        let row = match identifier {
            LoginIdentifier::Username(username) => {
                sqlx::query_as::<_, UserRow>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
                ))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?
            }
            LoginIdentifier::Email(email) => {
                sqlx::query_as::<_, UserRow>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
                ))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?
            }
            LoginIdentifier::Mobile {
                country_code,
                number,
            } => {
                sqlx::query_as::<_, UserRow>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE country_code = $1 AND mobile = $2"
                ))
                .bind(country_code)
                .bind(number)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn record_failed_attempt(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        // Increment in place at the storage layer so concurrent failures
        // from a brute-force burst are not lost to a read-modify-write race.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                last_failed_login_at = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset_failed_attempts(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0,
                last_failed_login_at = NULL,
                locked_until = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
