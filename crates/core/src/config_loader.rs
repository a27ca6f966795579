use crate::config::EngineConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

const ENV_PREFIX: &str = "ODTE_RISK_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads engine configuration by merging TOML, environment variables, and JSON.
    ///
    /// Missing files are skipped; absent keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or the merged configuration is invalid.
    pub fn load() -> Result<EngineConfig> {
        Self::extract(
            Figment::new()
                .merge(Toml::file("config/Risk.toml"))
                .merge(Self::env())
                .join(Json::file("config/Risk.json")),
        )
    }

    /// Loads engine configuration from a specific TOML file plus the environment overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the configuration is invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<EngineConfig> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Self::env()),
        )
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<EngineConfig> {
        let config: EngineConfig = figment.extract()?;
        config.validate()?;
        tracing::debug!(
            schedule = ?config.ledger.schedule,
            ladder = ?config.notch.ladder,
            "Risk engine configuration loaded"
        );
        Ok(config)
    }
}
