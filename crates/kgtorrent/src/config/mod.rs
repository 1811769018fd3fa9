//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{LoadError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (the process
    /// environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key).ok_or_else(|| LoadError::Config(format!("{} is not set", key)))
        };

        let mut config = Config {
            source: SourceConfig::new(require("METAKAGGLE_PATH")?, require("FK_CONSTRAINTS_PATH")?),
            target: TargetConfig::new(require("DB_HOST")?, require("DB_NAME")?, require("DB_USER")?),
            load: LoadConfig::default(),
            preprocess: PreprocessConfig::default(),
            download: DownloadConfig::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment values onto the parsed file.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DB_HOST") {
            self.target.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            self.target.port = port
                .parse()
                .map_err(|_| LoadError::Config(format!("DB_PORT is not a valid port: {}", port)))?;
        }
        if let Some(name) = lookup("DB_NAME") {
            self.target.database = name;
        }
        if let Some(user) = lookup("DB_USER") {
            self.target.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.target.password = password;
        }
        if let Some(path) = lookup("METAKAGGLE_PATH") {
            self.source.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FK_CONSTRAINTS_PATH") {
            self.source.constraints_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("NB_DEST_PATH") {
            self.download.dest_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}
