//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!(
            "Configuration loaded and validated successfully ({} rules)",
            config.rules.len()
        );
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.local_port == 0 {
                bail!("rule {}: local_port must be in range 1-65535", index);
            }

            if rule.remote_port == 0 {
                bail!("rule {}: remote_port must be in range 1-65535", index);
            }

            if rule.remote_host.trim().is_empty() {
                bail!("rule {}: remote_host must not be empty", index);
            }
        }

        Ok(())
    }
}
