//! CPU device configuration.
//!
//! # TOML Format
//! ```toml
//! [cpu]
//! n_threads = 4
//! alignment = 64
//! max_size = "2G"
//! ```

use hal_core::{parse_size, BackendError, Result};

pub const DEFAULT_ALIGNMENT: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Worker threads per backend (defaults to the number of online cores).
    pub n_threads: Option<usize>,
    /// Tensor alignment of the CPU buffer type. Must be a power of two.
    pub alignment: usize,
    /// Largest single allocation, human-readable (e.g. `"2G"`). Unlimited
    /// when absent.
    pub max_size: Option<String>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            n_threads: None,
            alignment: DEFAULT_ALIGNMENT,
            max_size: None,
        }
    }
}

impl CpuConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(BackendError::InitializationFailure(format!(
                "cpu alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.n_threads == Some(0) {
            return Err(BackendError::InitializationFailure(
                "cpu n_threads must be at least 1".into(),
            ));
        }
        self.max_size_bytes().map(|_| ())
    }

    pub fn resolve_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn max_size_bytes(&self) -> Result<usize> {
        self.max_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .map(|s| s.unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = CpuConfig::default();
        assert_eq!(c.alignment, 32);
        assert_eq!(c.max_size_bytes().unwrap(), usize::MAX);
        assert!(c.resolve_threads() >= 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let c = CpuConfig {
            alignment: 48,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = CpuConfig {
            n_threads: Some(0),
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = CpuConfig {
            max_size: Some("1G".into()),
            ..Default::default()
        };
        assert_eq!(c.max_size_bytes().unwrap(), 1 << 30);
    }
}
