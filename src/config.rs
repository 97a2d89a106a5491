//! # Engine Configuration
//!
//! [`EngineConfig`] gathers the knobs the engine reads at startup: worker
//! pool sizing and backpressure, and whether synthetic 500 bodies carry the
//! failure text.
//!
//! ## Sources
//!
//! Defaults, then an optional YAML file, then environment variables:
//!
//! ```yaml
//! pool:
//!   num_workers: 8
//!   queue_bound: 2048
//!   backpressure_mode: shed
//!   stack_size: 65536
//! expose_error_details: false
//! ```
//!
//! | Variable | Field |
//! |---|---|
//! | `CHAINR_WORKERS` | `pool.num_workers` |
//! | `CHAINR_QUEUE_BOUND` | `pool.queue_bound` |
//! | `CHAINR_BACKPRESSURE_MODE` | `pool.backpressure_mode` (`block` / `shed`) |
//! | `CHAINR_STACK_SIZE` | `pool.stack_size` (decimal or `0x` hex) |
//! | `CHAINR_EXPOSE_ERRORS` | `expose_error_details` |
//!
//! Unparseable variables are ignored with a warning rather than failing
//! startup.

use crate::worker_pool::WorkerPoolConfig;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: WorkerPoolConfig,
    /// Render failure details into synthetic 500 bodies. Development only.
    pub expose_error_details: bool,
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read a YAML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env();
        debug!(path = %path.display(), ?config, "Engine config loaded");
        Ok(config)
    }

    /// Parse YAML without consulting the environment.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// `load(path)` when a path is given, `from_env()` otherwise.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::from_env()),
        }
    }

    pub fn apply_env(&mut self) {
        self.pool.apply_env();
        if let Ok(raw) = std::env::var("CHAINR_EXPOSE_ERRORS") {
            match parse_flag(&raw) {
                Some(flag) => self.expose_error_details = flag,
                None => warn!(value = %raw, "Ignoring CHAINR_EXPOSE_ERRORS"),
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to render config as YAML")
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
