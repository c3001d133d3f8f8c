//! Message construction errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid property name '{0}'")]
    InvalidPropertyName(String),

    #[error("invalid value for property '{name}'")]
    InvalidPropertyValue { name: String },

    #[error("property name '{0}' is reserved by the hub")]
    ReservedProperty(String),
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
