//! Connection state and the events reported to the application.

use std::fmt;

/// Lifecycle state of a transport core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
}

/// Connection change reported to the registered state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectionSuccess,
    ConnectionDrop,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionSuccess => f.write_str("CONNECTION_SUCCESS"),
            Self::ConnectionDrop => f.write_str("CONNECTION_DROP"),
        }
    }
}
