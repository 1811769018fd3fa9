//! Configuration validation.

use super::Config;
use crate::error::{LoadError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.path.as_os_str().is_empty() {
        return Err(LoadError::Config("source.path is required".into()));
    }
    if config.source.constraints_file.as_os_str().is_empty() {
        return Err(LoadError::Config(
            "source.constraints_file is required".into(),
        ));
    }
    if config.source.date_formats.is_empty() {
        return Err(LoadError::Config(
            "source.date_formats must list at least one format".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(LoadError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(LoadError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(LoadError::Config("target.user is required".into()));
    }
    match config.target.ssl_mode.as_str() {
        "disable" | "prefer" => {}
        other => {
            return Err(LoadError::Config(format!(
                "target.ssl_mode must be 'disable' or 'prefer', got '{}'",
                other
            )))
        }
    }

    // Load config validation - only check if explicitly set
    if config.load.batch_size == 0 {
        return Err(LoadError::Config(
            "load.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.load.write_workers {
        return Err(LoadError::Config(
            "load.write_workers must be at least 1".into(),
        ));
    }
    if config.load.primary_key_column.is_empty() {
        return Err(LoadError::Config(
            "load.primary_key_column is required".into(),
        ));
    }

    for rule in &config.preprocess.round {
        if rule.digits > 15 {
            return Err(LoadError::Config(format!(
                "preprocess.round for {} must use at most 15 digits",
                rule.table
            )));
        }
    }

    if config.download.languages.is_empty() {
        return Err(LoadError::Config(
            "download.languages must list at least one language".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DownloadConfig, LoadConfig, PreprocessConfig, SourceConfig, TargetConfig,
    };
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                path: PathBuf::from("/data/meta-kaggle"),
                constraints_file: PathBuf::from("/data/fk.csv"),
                include_unconstrained_tables: false,
                date_suffix: "Date".to_string(),
                date_formats: vec!["%m/%d/%Y".to_string()],
                infer_rows: None,
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "kgtorrent".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            load: LoadConfig::default(),
            preprocess: PreprocessConfig::default(),
            download: DownloadConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_target_host() {
        let mut config = valid_config();
        config.target.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_source_path() {
        let mut config = valid_config();
        config.source.path = PathBuf::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.load.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_write_workers() {
        let mut config = valid_config();
        config.load.write_workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "require".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}
