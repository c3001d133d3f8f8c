//! Shared types for the hublink device client (transport-independent).

pub mod error;
pub mod message;
pub mod status;
pub mod uri;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{Message, MessageProperty};
pub use status::{IotHubStatusCode, MessageResult};
