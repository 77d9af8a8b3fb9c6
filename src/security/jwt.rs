//! Signed token issuance and validation.
//!
//! Tokens are HMAC-SHA256 (HS256) JWTs signed with a key derived from the
//! configured secret. The codec is pure and stateless: revocation and
//! persistence live elsewhere.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Token claims, validated once at parse time. Call sites never touch a
/// generic claim map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (the username)
    pub sub: String,
    /// Token id, used for revocation lookups
    pub jti: String,
    /// Issued at (epoch seconds)
    pub iat: i64,
    /// Expiry (epoch seconds)
    pub exp: i64,
    pub user_id: Uuid,
    #[serde(default)]
    pub authorities: Vec<String>,
    /// "access" or "refresh"
    pub token_type: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// A freshly signed token plus the metadata callers need to track it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            Duration::seconds(config.access_token_ttl_secs),
            Duration::days(config.refresh_token_ttl_days),
        )
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Issue a short-lived access token carrying the subject, user id, and
    /// authority list. The token id (`jti`) is a fresh random UUID.
    pub fn issue_access(
        &self,
        subject: &str,
        user_id: Uuid,
        authorities: &[String],
    ) -> Result<IssuedToken> {
        self.issue(subject, user_id, authorities.to_vec(), TOKEN_TYPE_ACCESS, self.access_ttl)
    }

    /// Issue a refresh token with minimal claims and the refresh type marker.
    pub fn issue_refresh(&self, subject: &str, user_id: Uuid) -> Result<IssuedToken> {
        self.issue(subject, user_id, Vec::new(), TOKEN_TYPE_REFRESH, self.refresh_ttl)
    }

    fn issue(
        &self,
        subject: &str,
        user_id: Uuid,
        authorities: Vec<String>,
        token_type: &str,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let token_id = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: subject.to_string(),
            jti: token_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            user_id,
            authorities,
            token_type: token_type.to_string(),
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            token_id,
            expires_at,
        })
    }

    /// Validate signature and expiry, returning the typed claims.
    ///
    /// Fails closed: any parse, signature, or expiry problem is a hard
    /// rejection. Expiry is a strict `now > exp` check with no leeway.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    pub fn extract_token_id(&self, token: &str) -> Result<String> {
        Ok(self.validate(token)?.jti)
    }

    pub fn extract_user_id(&self, token: &str) -> Result<Uuid> {
        Ok(self.validate(token)?.user_id)
    }

    pub fn extract_authorities(&self, token: &str) -> Result<Vec<String>> {
        Ok(self.validate(token)?.authorities)
    }

    pub fn is_refresh(&self, token: &str) -> Result<bool> {
        Ok(self.validate(token)?.token_type == TOKEN_TYPE_REFRESH)
    }
}
