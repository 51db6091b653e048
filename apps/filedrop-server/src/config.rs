//! Server configuration.
//!
//! Optional TOML file passed with `--config`; every key has a default.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use filedrop_data_channel::{CHUNK_SIZE, MAX_HEADER_LEN, SessionConfig, TCP_IDLE_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind the listener to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Socket read size for file bodies.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds a session may wait for the next bytes (0 = no limit).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Maximum header bytes before the terminator.
    #[serde(default = "default_max_header_len")]
    pub max_header_len: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_idle_timeout_secs() -> u64 {
    TCP_IDLE_TIMEOUT.as_secs()
}

fn default_max_header_len() -> usize {
    MAX_HEADER_LEN
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            chunk_size: default_chunk_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_header_len: default_max_header_len(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or returns defaults when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        anyhow::ensure!(config.chunk_size > 0, "chunk_size must be positive");

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.chunk_size,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            max_header_len: self.max_header_len,
        }
    }
}
