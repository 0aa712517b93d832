//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (`--config`, or PARLEY_CONFIG)
//! 3. Environment variables

use parley_protocol::{checksum, Command, DEFAULT_PORT, DEFAULT_ROOM};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default number of messages retained per room.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Default capacity of a connection's outbound queue, in frames.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Room configuration.
    pub rooms: RoomsConfig,
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by variable name.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&var);
        self.rooms.apply_overrides(&var);
    }

    /// Checks that the configuration can run a server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.ports.is_empty() {
            return Err(ConfigError::Validation("no listen ports configured".to_string()));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.network.outbound_capacity == 0 {
            return Err(ConfigError::Validation(
                "outbound_capacity must be at least 1".to_string(),
            ));
        }
        self.rooms.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address every listener binds to.
    pub host: IpAddr,
    /// Ports to listen on. Every port shares one room registry.
    pub ports: Vec<u16>,
    /// Maximum concurrent connections across all ports.
    pub max_connections: usize,
    /// Frames queued per connection before broadcast pushes are dropped.
    pub outbound_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports: vec![DEFAULT_PORT],
            max_connections: 1000,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("PARLEY_HOST").and_then(|h| h.parse().ok()) {
            self.host = host;
        }

        if let Some(ports) = var("PARLEY_PORTS") {
            let parsed: Result<Vec<u16>, _> = ports
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::parse)
                .collect();
            if let Ok(parsed) = parsed {
                self.ports = parsed;
            }
        }

        if let Some(max) = var("PARLEY_MAX_CONNECTIONS").and_then(|m| m.parse().ok()) {
            self.max_connections = max;
        }

        if let Some(capacity) = var("PARLEY_OUTBOUND_CAPACITY").and_then(|c| c.parse().ok()) {
            self.outbound_capacity = capacity;
        }
    }

    /// Returns one socket address per configured port.
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.ports
            .iter()
            .map(|&port| SocketAddr::new(self.host, port))
            .collect()
    }
}

/// Room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Room every new connection joins.
    pub default_room: String,
    /// Messages retained per room; the oldest is evicted past this.
    pub history_capacity: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_room: DEFAULT_ROOM.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RoomsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(room) = var("PARLEY_DEFAULT_ROOM").filter(|r| !r.trim().is_empty()) {
            self.default_room = room;
        }

        if let Some(capacity) = var("PARLEY_HISTORY_CAPACITY").and_then(|c| c.parse().ok()) {
            self.history_capacity = capacity;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        // The default room must be listable and reachable by CHANGECHATROOM.
        let command = Command::ChangeChatRoom(self.default_room.clone());
        command.validate().map_err(|e| {
            ConfigError::Validation(format!("default_room '{}': {}", self.default_room, e))
        })?;
        match Command::parse(&checksum::seal(&command.to_payload())) {
            Ok(parsed) if parsed == command => Ok(()),
            _ => Err(ConfigError::Validation(format!(
                "default_room '{}' cannot be named in CHANGECHATROOM",
                self.default_room
            ))),
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
