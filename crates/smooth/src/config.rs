//! JSON configuration for smoothing runs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::KernelShape;

/// Configuration for building an index and running smoothing passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Maximum particles per tree leaf.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
    /// Neighbors per particle for smoothing.
    #[serde(default = "default_n_smooth")]
    pub n_smooth: usize,
    /// Periodic box edge length; zero or negative disables wrap.
    #[serde(default)]
    pub period: f64,
    /// Worker threads for tree construction and smoothing passes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Kernel shape for weighted properties.
    #[serde(default = "default_kernel")]
    pub kernel: KernelShape,
}

fn default_bucket_size() -> usize {
    16
}

fn default_n_smooth() -> usize {
    64
}

fn default_workers() -> usize {
    1
}

fn default_kernel() -> KernelShape {
    KernelShape::CubicSpline
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            n_smooth: default_n_smooth(),
            period: 0.0,
            workers: default_workers(),
            kernel: default_kernel(),
        }
    }
}

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl SmoothingConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_size == 0 {
            return Err(ConfigError::Invalid(
                "bucket_size must be at least 1".to_string(),
            ));
        }
        if self.n_smooth == 0 {
            return Err(ConfigError::Invalid(
                "n_smooth must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
