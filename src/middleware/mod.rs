pub mod jwt_auth;

pub use jwt_auth::{authenticate_request, CurrentUser, RequestAuthState};
