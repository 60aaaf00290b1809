//! Configuration resolution for the event spool.
//!
//! Implements deterministic config resolution order:
//! 1. Explicit CLI flag (--config)
//! 2. Environment variable (SPOOL_CONFIG)
//! 3. XDG config (`$XDG_CONFIG_HOME/event_spool/config.json`)
//! 4. Platform config dir (`~/.config/event_spool/config.json`)
//! 5. Built-in defaults

use std::env;
use std::fs;
use std::path::PathBuf;

use spool_common::{Error, Result};

use crate::SpoolConfig;

const CONFIG_ENV: &str = "SPOOL_CONFIG";
const STORAGE_DIR_ENV: &str = "SPOOL_STORAGE_DIR";
const CONFIG_DIR_NAME: &str = "event_spool";
const CONFIG_FILE_NAME: &str = "config.json";

/// How the config file was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResolution {
    CliFlag,
    EnvVar,
    XdgConfig,
    Default,
}

impl std::fmt::Display for ConfigResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigResolution::CliFlag => write!(f, "cli"),
            ConfigResolution::EnvVar => write!(f, "env"),
            ConfigResolution::XdgConfig => write!(f, "xdg"),
            ConfigResolution::Default => write!(f, "default"),
        }
    }
}

/// Where the loaded configuration came from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file, or None if using defaults
    pub path: Option<PathBuf>,
    pub resolution: ConfigResolution,
}

/// Configuration resolver with deterministic resolution order.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver honouring an explicit `--config` path.
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        ConfigResolver { cli_path }
    }

    /// Create a resolver with no CLI overrides.
    pub fn with_defaults() -> Self {
        ConfigResolver { cli_path: None }
    }

    /// Resolve the config file path from the process environment.
    pub fn resolve_config_path(&self) -> (Option<PathBuf>, ConfigResolution) {
        self.resolve_config_path_with(|key| env::var(key).ok())
    }

    /// Resolve the config file path using `lookup` for environment variables.
    pub fn resolve_config_path_with<F>(&self, lookup: F) -> (Option<PathBuf>, ConfigResolution)
    where
        F: Fn(&str) -> Option<String>,
    {
        // 1. CLI flag
        if let Some(ref path) = self.cli_path {
            return (Some(path.clone()), ConfigResolution::CliFlag);
        }

        // 2. SPOOL_CONFIG env var
        if let Some(path) = lookup(CONFIG_ENV) {
            return (Some(PathBuf::from(path)), ConfigResolution::EnvVar);
        }

        // 3. XDG_CONFIG_HOME, then 4. platform config dir
        let config_dir = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .map(|d| d.join(CONFIG_DIR_NAME));
        if let Some(dir) = config_dir {
            let path = dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                return (Some(path), ConfigResolution::XdgConfig);
            }
        }

        // 5. Defaults
        (None, ConfigResolution::Default)
    }

    /// Load and validate the configuration.
    pub fn load(&self) -> Result<(SpoolConfig, ConfigSource)> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load and validate the configuration using `lookup` for environment variables.
    pub fn load_with<F>(&self, lookup: F) -> Result<(SpoolConfig, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (path, resolution) = self.resolve_config_path_with(&lookup);

        let mut config = match &path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    Error::Config(format!("failed to read config from {}: {}", p.display(), e))
                })?;
                serde_json::from_str::<SpoolConfig>(&content).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {}", p.display(), e))
                })?
            }
            None => SpoolConfig::default(),
        };

        if let Some(dir) = lookup(STORAGE_DIR_ENV) {
            config.storage_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;

        let resolution = if path.is_some() {
            resolution
        } else {
            ConfigResolution::Default
        };
        Ok((config, ConfigSource { path, resolution }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn cli_flag_wins() {
        let temp = TempDir::new().unwrap();
        let cli = temp.path().join("cli.json");
        let resolver = ConfigResolver::new(Some(cli.clone()));
        let (path, resolution) =
            resolver.resolve_config_path_with(env_of(&[(CONFIG_ENV, "/elsewhere.json")]));
        assert_eq!(path, Some(cli));
        assert_eq!(resolution, ConfigResolution::CliFlag);
    }

    #[test]
    fn env_var_beats_xdg() {
        let resolver = ConfigResolver::with_defaults();
        let (path, resolution) =
            resolver.resolve_config_path_with(env_of(&[(CONFIG_ENV, "/etc/spool.json")]));
        assert_eq!(path, Some(PathBuf::from("/etc/spool.json")));
        assert_eq!(resolution, ConfigResolution::EnvVar);
    }

    #[test]
    fn xdg_config_used_when_present() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE_NAME), r#"{"batch_size": "large"}"#).unwrap();

        let xdg = temp.path().to_string_lossy().to_string();
        let resolver = ConfigResolver::with_defaults();
        let (config, source) = resolver
            .load_with(env_of(&[("XDG_CONFIG_HOME", &xdg)]))
            .unwrap();
        assert_eq!(source.resolution, ConfigResolution::XdgConfig);
        assert_eq!(config.batch_size, crate::BatchSize::Large);
    }

    #[test]
    fn load_applies_storage_dir_env() {
        let temp = TempDir::new().unwrap();
        let cli = temp.path().join("spool.json");
        fs::write(&cli, "{}").unwrap();

        let resolver = ConfigResolver::new(Some(cli));
        let (config, source) = resolver
            .load_with(env_of(&[(STORAGE_DIR_ENV, "/var/spool")]))
            .unwrap();
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/spool")));
        assert_eq!(source.resolution, ConfigResolution::CliFlag);
    }

    #[test]
    fn missing_cli_file_is_an_error() {
        let resolver = ConfigResolver::new(Some(PathBuf::from("/nonexistent/spool.json")));
        let err = resolver.load_with(env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let cli = temp.path().join("spool.json");
        fs::write(&cli, r#"{"backpressure": {"capacity": 0}}"#).unwrap();

        let err = ConfigResolver::new(Some(cli))
            .load_with(env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn malformed_json_reports_path() {
        let temp = TempDir::new().unwrap();
        let cli = temp.path().join("spool.json");
        fs::write(&cli, "{not json").unwrap();

        let err = ConfigResolver::new(Some(cli))
            .load_with(env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
