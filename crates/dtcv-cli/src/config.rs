//! Configuration file handling for dtcv

use anyhow::{Context, Result};
use dtcv_bench::config::{SocketCanConfig, TransportConfig};
use dtcv_bench::BenchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default bench configuration file
    pub bench: Option<PathBuf>,
    /// Default SocketCAN interface
    pub interface: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Directory holding `config.toml` and the default `bench.toml`
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("dtcv"))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        bench: Option<&Path>,
        interface: Option<&str>,
        no_color: bool,
    ) -> MergedConfig {
        MergedConfig {
            bench: bench
                .map(Path::to_path_buf)
                .or_else(|| self.bench.clone())
                .or_else(|| {
                    Self::config_dir()
                        .ok()
                        .map(|dir| dir.join("bench.toml"))
                        .filter(|path| path.exists())
                }),
            interface: interface
                .map(String::from)
                .or_else(|| self.interface.clone()),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub bench: Option<PathBuf>,
    pub interface: Option<String>,
    pub no_color: bool,
}

impl MergedConfig {
    /// Load the bench configuration (defaults when no file is set) and
    /// apply the interface override
    pub fn bench_config(&self) -> Result<BenchConfig> {
        let mut config = match &self.bench {
            Some(path) => BenchConfig::load(path)
                .with_context(|| format!("Failed to load bench config: {}", path.display()))?,
            None => BenchConfig::default(),
        };
        if let Some(interface) = &self.interface {
            config.transport = TransportConfig::SocketCan(SocketCanConfig {
                interface: interface.clone(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_file() {
        let file = Config {
            bench: Some(PathBuf::from("/etc/dtcv/bench.toml")),
            interface: Some("can1".to_string()),
            no_color: Some(true),
        };
        let merged = file.merge_with_args(Some(Path::new("local.toml")), Some("vcan0"), false);
        assert_eq!(merged.bench, Some(PathBuf::from("local.toml")));
        assert_eq!(merged.interface.as_deref(), Some("vcan0"));
        assert!(merged.no_color);
    }

    #[test]
    fn test_interface_selects_socketcan() {
        let merged = MergedConfig {
            bench: None,
            interface: Some("vcan0".to_string()),
            no_color: false,
        };
        match merged.bench_config().unwrap().transport {
            TransportConfig::SocketCan(cfg) => assert_eq!(cfg.interface, "vcan0"),
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_bench_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "[timing]\nsettle_units = 20\n").unwrap();

        let merged = Config::default().merge_with_args(Some(&path), None, false);
        let bench = merged.bench_config().unwrap();
        assert_eq!(bench.timing.settle_units, 20);
        assert!(matches!(bench.transport, TransportConfig::Mock));

        std::fs::write(&path, "[timing]\ntime_unit_ms = 0\n").unwrap();
        assert!(merged.bench_config().is_err());
    }
}
