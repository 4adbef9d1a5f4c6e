//! Format-agnostic config loading: file (JSON/YAML/TOML, by extension) +
//! `GRIDBOT_`-prefixed environment overlay, built on `config::Config::builder()`
//! with `File`/`Environment` sources collapsed into one clean path.

use super::EngineConfig;
use crate::error::{GridEngineError, Result};
use config::{Config as RawConfig, Environment, File};
use std::path::Path;

pub struct ConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            builder: RawConfig::builder(),
        }
    }

    /// Load the primary document. Format is inferred from the extension
    /// (`.json`, `.yaml`/`.yml`, `.toml`); the `config` crate auto-detects it.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        self.builder = self.builder.add_source(
            File::from(path.to_path_buf()).required(true),
        );
        Ok(self)
    }

    /// Layer environment-variable overrides (`GRIDBOT_GRID__LEVERAGE=5`, etc).
    pub fn with_env_overlay(mut self) -> Self {
        dotenv::dotenv().ok();
        self.builder = self
            .builder
            .add_source(Environment::with_prefix("GRIDBOT").separator("__"));
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let raw = self
            .builder
            .build()
            .map_err(|e| GridEngineError::ConfigInvalid(e.to_string()))?;
        let config: EngineConfig = raw
            .try_deserialize()
            .map_err(|e| GridEngineError::ConfigInvalid(e.to_string()))?;
        config.grid.require_valid()?;
        Ok(config)
    }

    /// Convenience one-shot: file + env overlay + validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<EngineConfig> {
        Self::new().with_file(path)?.with_env_overlay().build()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
