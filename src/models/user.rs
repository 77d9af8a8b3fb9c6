use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AuthError, Result};

/// Account status, independent of the time-boxed login lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
    Expired,
}

impl AccountStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "disabled" => Some(AccountStatus::Disabled),
            "expired" => Some(AccountStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Expired => "expired",
        }
    }
}

/// User record as seen by the authentication core. The rest of the user
/// entity (profile, preferences) lives elsewhere.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub country_code: Option<String>,
    pub mobile: Option<String>,
    pub password_hash: String,
    pub status: AccountStatus,
    /// Time-boxed lockout; `None` or a past timestamp means not locked
    pub locked_until: Option<DateTime<Utc>>,
    /// `None` means the password was never changed, which counts as
    /// expired credentials
    pub password_changed_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
}

impl User {
    /// Check the account gates that apply to both login and per-request
    /// authentication. Returns the internal reason on failure; callers log
    /// it and surface only a generic error.
    pub fn account_gate(&self, now: DateTime<Utc>) -> std::result::Result<(), &'static str> {
        match self.status {
            AccountStatus::Active => {}
            AccountStatus::Disabled => return Err("account disabled"),
            AccountStatus::Expired => return Err("account expired"),
        }
        if let Some(locked_until) = self.locked_until {
            if locked_until > now {
                return Err("account locked");
            }
        }
        if self.password_changed_at.is_none() {
            return Err("credentials expired");
        }
        Ok(())
    }
}

/// The one identifier a login attempt runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Username(String),
    Email(String),
    Mobile { country_code: String, number: String },
}

impl LoginIdentifier {
    pub fn kind(&self) -> &'static str {
        match self {
            LoginIdentifier::Username(_) => "username",
            LoginIdentifier::Email(_) => "email",
            LoginIdentifier::Mobile { .. } => "mobile",
        }
    }

    /// Stable key for failure tracking and logging.
    pub fn key(&self) -> String {
        match self {
            LoginIdentifier::Username(u) => format!("username:{u}"),
            LoginIdentifier::Email(e) => format!("email:{}", e.to_lowercase()),
            LoginIdentifier::Mobile {
                country_code,
                number,
            } => format!("mobile:{country_code}{number}"),
        }
    }
}

/// Login request DTO. Exactly one of username, email, or the
/// country_code/mobile pair must be supplied.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 3, max = 64))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub country_code: Option<String>,
    pub mobile: Option<String>,
    #[validate(length(min = 1))]
    pub password: String,
}

impl LoginRequest {
    /// Resolve the supplied identifier. Zero or more than one identifier,
    /// or half of a mobile pair, is a validation failure before any user
    /// lookup happens.
    pub fn identifier(&self) -> Result<LoginIdentifier> {
        let mobile = match (&self.country_code, &self.mobile) {
            (Some(cc), Some(num)) => Some(LoginIdentifier::Mobile {
                country_code: cc.clone(),
                number: num.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(AuthError::Validation(
                    "country_code and mobile must be supplied together".to_string(),
                ))
            }
        };

        let mut candidates: Vec<LoginIdentifier> = Vec::new();
        if let Some(username) = &self.username {
            candidates.push(LoginIdentifier::Username(username.clone()));
        }
        if let Some(email) = &self.email {
            candidates.push(LoginIdentifier::Email(email.clone()));
        }
        if let Some(mobile) = mobile {
            candidates.push(mobile);
        }

        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(AuthError::Validation(
                "a login identifier is required".to_string(),
            )),
            _ => Err(AuthError::Validation(
                "exactly one login identifier must be supplied".to_string(),
            )),
        }
    }
}
