//! Engine configuration
//!
//! Loaded from YAML; the database URL comes from `.env` / the environment
//! and never lives in the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::domain::{normalize_instrument, Interval};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: WagerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// From DATABASE_URL (not in YAML)
    #[serde(skip)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerConfig {
    /// Payout percentage for a winning wager; not positive means default
    #[serde(default)]
    pub win_percent: Option<f64>,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Refuse to open on a price older than this
    #[serde(default)]
    pub max_price_age_ms: Option<u64>,
    /// Instruments that may be wagered on; empty allows any cached one
    #[serde(default)]
    pub instruments: Vec<String>,
}

impl Default for WagerConfig {
    fn default() -> Self {
        Self {
            win_percent: None,
            cooldown_ms: default_cooldown_ms(),
            max_price_age_ms: None,
            instruments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_settlements: usize,
    #[serde(default = "default_outbox_batch")]
    pub outbox_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_concurrent_settlements: default_max_concurrent(),
            outbox_batch_size: default_outbox_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_feed_url(),
            pairs: default_pairs(),
            intervals: default_intervals(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            max_connections: default_max_connections(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    2_000
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_max_concurrent() -> usize {
    32
}

fn default_outbox_batch() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_feed_url() -> String {
    "wss://stream.binance.com:9443/stream".to_string()
}

fn default_pairs() -> Vec<String> {
    vec!["btcusdt".to_string(), "ethusdt".to_string()]
}

fn default_intervals() -> Vec<String> {
    Interval::all().iter().map(|i| i.as_str().to_string()).collect()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_max_connections() -> u32 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: WagerConfig::default(),
            scheduler: SchedulerConfig::default(),
            feed: FeedConfig::default(),
            storage: StorageConfig::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            log_level: default_log_level(),
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from YAML file and .env
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&yaml_content)?;

        // Don't fail if .env doesn't exist
        dotenv::dotenv().ok();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            info!("Database URL taken from environment");
            config.database_url = Some(db_url);
        }

        if config.storage.backend == StorageBackend::Postgres && config.database_url.is_none() {
            return Err(ConfigError::EnvVarMissing("DATABASE_URL".to_string()));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.engine.instruments = config
            .engine
            .instruments
            .iter()
            .map(|i| normalize_instrument(i))
            .collect();
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(pct) = self.engine.win_percent {
            if !pct.is_finite() {
                return Err(ConfigError::ValidationError(
                    "win_percent must be a finite number".to_string(),
                ));
            }
        }

        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tick_ms must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.max_concurrent_settlements == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_settlements must be greater than 0".to_string(),
            ));
        }

        if self.feed.enabled {
            if self.feed.pairs.is_empty() {
                return Err(ConfigError::ValidationError(
                    "feed.pairs cannot be empty when the feed is enabled".to_string(),
                ));
            }
            for interval in &self.feed.intervals {
                interval.parse::<Interval>().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "feed interval {} must be one of 1m, 5m, 15m",
                        interval
                    ))
                })?;
            }
            if !self.feed.base_url.starts_with("ws://") && !self.feed.base_url.starts_with("wss://") {
                return Err(ConfigError::ValidationError(
                    "feed.base_url must be a ws:// or wss:// URL".to_string(),
                ));
            }
        }

        if self.storage.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.engine.cooldown_ms as i64)
    }

    pub fn max_price_age(&self) -> Option<chrono::Duration> {
        self.engine
            .max_price_age_ms
            .map(|ms| chrono::Duration::milliseconds(ms as i64))
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler.tick_ms)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!(
            "  Win percent: {}",
            self.engine
                .win_percent
                .map(|p| p.to_string())
                .unwrap_or_else(|| "default".to_string())
        );
        info!("  Open cooldown: {} ms", self.engine.cooldown_ms);
        info!("  Instruments: {}", if self.engine.instruments.is_empty() { "any cached".to_string() } else { self.engine.instruments.join(", ") });
        info!("  Scheduler tick: {} ms", self.scheduler.tick_ms);
        info!("  Max concurrent settlements: {}", self.scheduler.max_concurrent_settlements);
        info!("  Feed: {}", if self.feed.enabled { self.feed.pairs.join(", ") } else { "disabled".to_string() });
        info!("  Storage: {:?}", self.storage.backend);
        info!("  Log level: {}", self.log_level);
    }
}
