//! Authentication: password hashing, JWTs and refresh-token sessions

pub mod jwt;
pub mod password;
pub mod service;

pub use jwt::{hash_token, AccessClaims, RefreshClaims, TokenPair, TokenService};
pub use password::{hash_password, verify_password};
pub use service::{AuthService, AuthSession, ClientInfo, RegisterInput};

use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Token encoding failed: {0}")]
    Jwt(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken | AuthError::InvalidRefreshToken => {
                ApiError::unauthorized(err.to_string())
            }
            AuthError::Hashing(_) | AuthError::Jwt(_) => ApiError::internal(err.to_string()),
        }
    }
}
