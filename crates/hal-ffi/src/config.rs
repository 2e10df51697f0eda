//! Runtime configuration for the C boundary, loaded from TOML.
//!
//! # TOML Format
//! ```toml
//! log_level = "info"
//!
//! [cpu]
//! n_threads = 4
//! alignment = 64
//!
//! [[sim.devices]]
//! name = "SIM0"
//! memory = "512M"
//! latency_us = 20
//! ```

use std::path::{Path, PathBuf};

use hal_cpu::CpuConfig;
use hal_sim::SimConfig;
use thiserror::Error;

pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialise error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] hal_core::BackendError),
}

/// Configuration of the process-wide registries behind `hal_init`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    pub log_level: String,
    pub cpu: CpuConfig,
    pub sim: SimConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            cpu: CpuConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the CPU section and every listed simulated device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cpu.validate()?;
        for dev in &self.sim.devices {
            dev.validate()?;
        }
        Ok(())
    }
}
