//! # Node Configuration
//!
//! Gateway settings plus the execution host layout, read from an optional
//! TOML file and then overridden from the environment.
//!
//! ## Environment overrides
//!
//! - `RECON_PORT` - HTTP port
//! - `RECON_RATE_LIMIT` - requests per minute per client address
//! - `RECON_ALLOW_QUEUE_FOR_ALL` - `true`/`false`
//! - `RECON_USERS_PATH` - user directory file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use recon_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Gateway configuration.
    pub gateway: GatewayConfig,
    /// Execution host layout.
    pub host: HostConfig,
}

/// Execution host layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Number of partition owner threads.
    pub partitions: usize,
    /// Actors brought online at startup.
    pub resident_actors: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            resident_actors: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load from `path` (if any), apply process environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `RECON_*` overrides read through `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("RECON_PORT") {
            match port.parse() {
                Ok(p) => self.gateway.http.port = p,
                Err(_) => warn!(value = %port, "RECON_PORT is not a valid port"),
            }
        }
        if let Some(limit) = lookup("RECON_RATE_LIMIT") {
            match limit.parse() {
                Ok(l) => self.gateway.rate_limit.requests_per_minute = l,
                Err(_) => warn!(value = %limit, "RECON_RATE_LIMIT is not a number"),
            }
        }
        if let Some(flag) = lookup("RECON_ALLOW_QUEUE_FOR_ALL") {
            match flag.parse() {
                Ok(f) => self.gateway.execution.allow_queue_for_all_users = f,
                Err(_) => warn!(value = %flag, "RECON_ALLOW_QUEUE_FOR_ALL must be true or false"),
            }
        }
        if let Some(path) = lookup("RECON_USERS_PATH") {
            self.gateway.storage.users_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway
            .validate()
            .context("Invalid gateway configuration")?;
        if self.host.partitions == 0 {
            anyhow::bail!("host.partitions must be at least 1");
        }
        Ok(())
    }
}
