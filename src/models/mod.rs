pub mod token;
pub mod user;

pub use token::{
    AuthResponse, NewRefreshToken, Principal, RefreshTokenRecord, TokenRefreshResponse,
};
pub use user::{AccountStatus, LoginIdentifier, LoginRequest, User};
