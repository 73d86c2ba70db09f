//! TOML configuration for the CLI tools
//!
//! Everything has a default so both binaries run with no config file; a file
//! given on the command line overrides field by field.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// One ladder rung as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileConfig {
    pub name: String,
    pub bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Local bind address
    pub bind: SocketAddr,
    /// Remote peer to connect to (sender side)
    pub peer: Option<SocketAddr>,
    /// Encrypt media payloads
    pub encrypt: bool,
    /// Small kernel buffers for latency over throughput
    pub low_latency: bool,
    /// Seconds between statistics log lines, 0 disables
    pub stats_interval_secs: u64,
    /// Initial target bitrate; snaps the ladder on startup
    pub target_bitrate_kbps: Option<u32>,
    /// Custom profile ladder; empty means the built-in one
    pub profiles: Vec<ProfileConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0:0".parse().expect("static address"),
            peer: None,
            encrypt: true,
            low_latency: true,
            stats_interval_secs: 5,
            target_bitrate_kbps: None,
            profiles: Vec::new(),
        }
    }
}

impl Config {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// The profile ladder to use, falling back to the built-in one
    pub fn profile_ladder(&self) -> Vec<rtcast_control::StreamProfile> {
        if self.profiles.is_empty() {
            return rtcast_control::default_profiles();
        }
        self.profiles
            .iter()
            .map(|p| {
                rtcast_control::StreamProfile::new(&p.name, p.bitrate_kbps, p.width, p.height, p.fps)
            })
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
