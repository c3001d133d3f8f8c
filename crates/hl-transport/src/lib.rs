//! Device-to-hub transport.
//!
//! - `TransportCore`: outbound/inbound queues, the CLOSED/OPEN state machine,
//!   requeue on connection loss, and callback dispatch
//! - `TransportConnection` trait with HTTPS and MQTT implementations
//! - `MockConnection` for testing without a hub
//! - `TransportConfig` (TOML or connection string)

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod https;
pub mod mock;
pub mod mqtt;
pub mod packet;
pub mod state;
pub mod tls;
pub mod transport;

// Re-exports for convenience.
pub use config::{AuthConfig, ConnectionString, Protocol, TransportConfig};
pub use connection::{IotHubListener, ListenerSlot, TransportConnection};
pub use error::{TransportError, TransportResult};
pub use https::HttpsConnection;
pub use mock::MockConnection;
pub use mqtt::MqttConnection;
pub use packet::{
    CallbackContext, CallbackPacket, ConnectionStateCallback, EventCallback, MessageCallback,
    OutboundPacket,
};
pub use state::{ConnectionEvent, ConnectionState};
pub use transport::TransportCore;
