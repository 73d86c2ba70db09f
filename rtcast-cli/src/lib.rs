//! Shared pieces of the rtcast command-line tools

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, ProfileConfig};
