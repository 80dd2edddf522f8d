use std::path::Path;
use std::time::Instant;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::protocol::DEFAULT_TICK_RATE;

/// Hard cap imposed by the one-byte slot field on the wire.
pub const MAX_SLOTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    Server,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub max_clients: usize,
    pub tick_rate: u32,
    pub handshake_timeout_ticks: u32,
    pub handshake_resend_ticks: u32,
    pub stale_timeout_ticks: u32,
    pub ping_interval_ticks: u32,
    pub ping_timeout_ms: u32,
    pub max_malformed: u32,
    pub reliable_resend_ticks: u32,
    pub reliable_max_attempts: u32,
    pub max_pending_deltas: usize,
    pub snapshot_history: usize,
    pub announce_interval_ticks: u32,
    pub server_name: String,
    pub server_description: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            tick_rate: DEFAULT_TICK_RATE,
            handshake_timeout_ticks: 175,
            handshake_resend_ticks: 35,
            stale_timeout_ticks: 350,
            ping_interval_ticks: 105,
            ping_timeout_ms: 1000,
            max_malformed: 8,
            reliable_resend_ticks: 10,
            reliable_max_attempts: 5,
            max_pending_deltas: 64,
            snapshot_history: 64,
            announce_interval_ticks: 1050,
            server_name: "tickwire server".to_string(),
            server_description: String::new(),
        }
    }
}

impl NetConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 || self.max_clients > MAX_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "max_clients must be in 1..={}",
                MAX_SLOTS
            )));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.snapshot_history == 0 || self.max_pending_deltas == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_history and max_pending_deltas must be positive".into(),
            ));
        }
        if self.reliable_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reliable_max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Process-wide networking mode and tunables, created when the subsystem starts.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    mode: NetMode,
    config: NetConfig,
    started: Instant,
    net_enabled: bool,
}

impl NetworkContext {
    pub fn new(mode: NetMode, config: NetConfig) -> Self {
        Self {
            mode,
            config,
            started: Instant::now(),
            net_enabled: true,
        }
    }

    pub fn server(config: NetConfig) -> Self {
        Self::new(NetMode::Server, config)
    }

    pub fn client(config: NetConfig) -> Self {
        Self::new(NetMode::Client, config)
    }

    pub fn mode(&self) -> NetMode {
        self.mode
    }

    pub fn is_server(&self) -> bool {
        self.mode == NetMode::Server
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn net_enabled(&self) -> bool {
        self.net_enabled
    }

    pub fn set_net_enabled(&mut self, enabled: bool) {
        self.net_enabled = enabled;
    }

    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn ticks_to_ms(&self, ticks: u32) -> u64 {
        ticks as u64 * 1000 / self.config.tick_rate as u64
    }
}
