use serde::{Deserialize, Serialize};
use std::fmt;

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Failure at the credential store boundary
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Constraint violation: {0}")]
    Conflict(String),

    /// The store did not answer within the configured bound
    #[error("Store call timed out: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::ConstraintViolation => StoreError::Conflict(err.to_string()),
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::Timeout(err.to_string())
                }
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        // r2d2 only fails a checkout when the connection timeout elapses
        StoreError::Timeout(format!("connection pool: {}", err))
    }
}

/// Errors surfaced by the credential and session managers
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Validation failed")]
    ValidationFailed(Vec<FieldError>),

    #[error("An account with this email already exists")]
    DuplicateEmail,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session has expired")]
    SessionExpired,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Too many requests, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("Email delivery failed: {0}")]
    EmailDeliveryFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::ValidationFailed(_) => 400,
            AuthError::InvalidOrExpiredToken => 400,
            AuthError::DuplicateEmail => 409,
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::SessionExpired
            | AuthError::Unauthorized => 401,
            AuthError::EmailNotVerified | AuthError::Forbidden => 403,
            AuthError::RateLimited { .. } => 429,
            AuthError::Persistence(_)
            | AuthError::EmailDeliveryFailed(_)
            | AuthError::Internal(_) => 500,
        }
    }

    /// Message that is safe to hand back to a client.
    ///
    /// Server-side failures collapse to one generic text so store internals
    /// never leak through the response.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            500 => "An unexpected error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    /// Field errors attached to a validation failure
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            AuthError::ValidationFailed(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
