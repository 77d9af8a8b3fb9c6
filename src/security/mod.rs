/// Security primitives: token codec, password verification, and the
/// in-process revocation cache.
pub mod jwt;
pub mod password;
pub mod revocation;

pub use jwt::{Claims, IssuedToken, TokenCodec};
pub use password::{Argon2PasswordVerifier, PasswordVerifier};
pub use revocation::{RevocationCache, SweeperHandle};
