//! Transport error types.

use hl_auth::AuthError;
use hl_protocol::{IotHubStatusCode, ProtocolError};
use thiserror::Error;

/// Errors raised by the transport core and hub connections.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Network or wire-level failure. Retryable failures (host unreachable,
    /// DNS, refused connection) are also reported to the listener as a
    /// connection loss.
    #[error("protocol error: {message}")]
    Protocol { message: String, retryable: bool },

    /// The hub answered with a non-success status.
    #[error("hub rejected the request with status {0}")]
    Service(IotHubStatusCode),

    #[error("credential error: {0}")]
    Auth(#[from] AuthError),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn protocol(message: impl Into<String>, retryable: bool) -> Self {
        Self::Protocol {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Protocol { retryable: true, .. })
    }
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;
