//! Configuration for the authentication core.
//!
//! All settings come from environment variables with development-friendly
//! defaults; only the signing secret is mandatory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Symmetric secret for HMAC-SHA256 token signing
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in days
    pub refresh_token_ttl_days: i64,
    /// Maximum concurrent refresh tokens per user; the oldest are evicted
    /// FIFO when a new login would exceed this
    pub max_sessions_per_user: u64,
    /// Interval between revocation cache sweeps, in seconds
    pub revocation_sweep_interval_secs: u64,
    /// Interval between expired refresh token cleanup runs, in seconds
    pub refresh_cleanup_interval_secs: u64,
    /// How long expired refresh token rows are retained before physical
    /// deletion, in days
    pub refresh_retention_days: i64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            jwt_secret: env::var("AUTH_JWT_SECRET").context("AUTH_JWT_SECRET must be set")?,
            access_token_ttl_secs: env::var("AUTH_ACCESS_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("Invalid AUTH_ACCESS_TOKEN_TTL_SECS")?,
            refresh_token_ttl_days: env::var("AUTH_REFRESH_TOKEN_TTL_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid AUTH_REFRESH_TOKEN_TTL_DAYS")?,
            max_sessions_per_user: env::var("AUTH_MAX_SESSIONS_PER_USER")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid AUTH_MAX_SESSIONS_PER_USER")?,
            revocation_sweep_interval_secs: env::var("AUTH_REVOCATION_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("Invalid AUTH_REVOCATION_SWEEP_INTERVAL_SECS")?,
            refresh_cleanup_interval_secs: env::var("AUTH_REFRESH_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid AUTH_REFRESH_CLEANUP_INTERVAL_SECS")?,
            refresh_retention_days: env::var("AUTH_REFRESH_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid AUTH_REFRESH_RETENTION_DAYS")?,
        })
    }
}
