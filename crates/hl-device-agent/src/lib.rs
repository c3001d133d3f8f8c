//! hublink device agent, library crate.
//!
//! Re-exports the agent's modules so external crates (e.g. `hl-e2e-tests`)
//! can drive a `DeviceClient` and the pump without the binary.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod pump;

pub use client::DeviceClient;
pub use config::AgentConfig;
