//! Credential error types.

use thiserror::Error;

/// Errors raised by credential providers.
///
/// Every certificate, key, or algorithm failure surfaces as [`AuthError::Io`]
/// regardless of which library produced it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("token error: {0}")]
    Token(String),
}

/// Convenience alias for credential results.
pub type AuthResult<T> = Result<T, AuthError>;
