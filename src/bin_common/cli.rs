//! CLI utilities for binaries
//!
//! Config file resolution: `--config <path>` on the command line wins, then
//! the config type's environment variable, then its default path.

use std::path::PathBuf;

/// Type of configuration to load
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Engine configuration (engine_config.yaml)
    Engine,
    /// Custom path
    Custom(String),
}

impl ConfigType {
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Engine => "config/engine_config.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    pub fn env_var_name(&self) -> &str {
        match self {
            ConfigType::Engine => "ENGINE_CONFIG_PATH",
            ConfigType::Custom(_) => "CONFIG_PATH",
        }
    }
}

/// Configuration path from the environment, or the type's default
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    std::env::var(config_type.env_var_name())
        .unwrap_or_else(|_| config_type.default_path().to_string())
        .into()
}

/// `--config <path>` / `--config=<path>` if present, else [`load_config_from_env`]
pub fn resolve_config_path(args: &[String], config_type: ConfigType) -> anyhow::Result<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(PathBuf::from(path));
        }
        if arg == "--config" {
            return match iter.next() {
                Some(path) => Ok(PathBuf::from(path)),
                None => anyhow::bail!("--config requires a path"),
            };
        }
    }
    Ok(load_config_from_env(config_type))
}

/// Command line arguments, program name excluded
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

/// Arguments that are not `--config` or its value
pub fn positional_args(args: &[String]) -> Vec<String> {
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            iter.next();
        } else if !arg.starts_with("--config=") {
            positional.push(arg.clone());
        }
    }
    positional
}
