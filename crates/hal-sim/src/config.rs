//! Simulated device configuration.
//!
//! # TOML Format
//! ```toml
//! [[sim.devices]]
//! name = "SIM0"
//! memory = "256M"
//! alignment = 256
//! latency_us = 50
//! ```
//!
//! The same fields are accepted by `add_device` as a params string:
//! `name=SIM1,memory=64M,alignment=128,latency_us=0`.

use std::time::Duration;

use hal_core::{parse_size, BackendError, Params, Result};

pub const DEFAULT_ALIGNMENT: usize = 256;
pub const DEFAULT_MEMORY: &str = "1G";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimDeviceConfig {
    pub name: String,
    /// Device memory capacity, human-readable (e.g. `"256M"`).
    pub memory: String,
    /// Tensor alignment of the device buffer type. Must be a power of two.
    pub alignment: usize,
    /// Delay applied to every command on a backend's stream.
    pub latency_us: u64,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            name: "SIM0".to_string(),
            memory: DEFAULT_MEMORY.to_string(),
            alignment: DEFAULT_ALIGNMENT,
            latency_us: 0,
        }
    }
}

impl SimDeviceConfig {
    /// Build a device config from an `add_device` params string. `name` is
    /// required; the other keys fall back to the defaults.
    pub fn from_params(params: &str) -> Result<Self> {
        let parsed = Params::parse(params)?;
        parsed.expect_keys(&["name", "memory", "alignment", "latency_us"])?;
        let name = parsed
            .get("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BackendError::InvalidParams {
                params: params.to_string(),
                reason: "missing 'name'".into(),
            })?;
        let defaults = SimDeviceConfig::default();
        let config = SimDeviceConfig {
            name: name.to_string(),
            memory: parsed.get("memory").unwrap_or(&defaults.memory).to_string(),
            alignment: parsed.get_usize("alignment")?.unwrap_or(defaults.alignment),
            latency_us: parsed
                .get_usize("latency_us")?
                .map_or(defaults.latency_us, |us| us as u64),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BackendError::InitializationFailure(
                "sim device name must not be empty".into(),
            ));
        }
        if !self.alignment.is_power_of_two() {
            return Err(BackendError::InitializationFailure(format!(
                "sim device '{}': alignment {} is not a power of two",
                self.name, self.alignment
            )));
        }
        if self.memory_bytes()? == 0 {
            return Err(BackendError::InitializationFailure(format!(
                "sim device '{}' has no memory",
                self.name
            )));
        }
        Ok(())
    }

    pub fn memory_bytes(&self) -> Result<usize> {
        parse_size(&self.memory)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us)
    }
}

/// Devices the `SIM` registry starts with.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub devices: Vec<SimDeviceConfig>,
}
