//! Password verification using Argon2id.
//!
//! The core only ever verifies; credential creation and strength policy
//! belong to the user-management side of the application. The seam is a
//! trait so the engine can be exercised without Argon2's cost in tests.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString},
    Argon2,
};

use crate::error::{AuthError, Result};

/// Collaborator interface for checking a raw password against a stored hash.
pub trait PasswordVerifier: Send + Sync {
    fn matches(&self, raw: &str, password_hash: &str) -> Result<bool>;
}

/// Argon2id verifier over PHC-formatted hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2PasswordVerifier;

impl PasswordVerifier for Argon2PasswordVerifier {
    fn matches(&self, raw: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| AuthError::Internal(format!("invalid password hash format: {e}")))?;

        match Argon2::default().verify_password(raw.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!(
                "password verification failed: {e}"
            ))),
        }
    }
}

/// Hash a password with a random salt. Exposed for account provisioning
/// and fixtures; strength policy is enforced upstream.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))?
        .to_string();

    Ok(password_hash)
}
