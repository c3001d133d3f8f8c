//! Device agent configuration, loadable from TOML.

use serde::Deserialize;

use hl_transport::TransportConfig;

/// Top-level configuration for the device agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Hub connection settings.
    pub transport: TransportConfig,
    /// How often queued messages are sent and callbacks run.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How often the hub is polled for cloud-to-device messages.
    #[serde(default = "default_receive_interval")]
    pub receive_interval_ms: u64,
    /// Heartbeat event interval in seconds; 0 disables heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_receive_interval() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    60
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
