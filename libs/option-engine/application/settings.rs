//! Operator settings
//!
//! The win percentage can be changed at runtime by the operator; everything
//! else is fixed at startup.

use chrono::Duration;
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::domain::normalize_instrument;
use crate::domain::payout::effective_win_percent;
use crate::infrastructure::config::EngineConfig;

/// Default open cooldown per account
pub const DEFAULT_OPEN_COOLDOWN_MS: i64 = 2_000;

#[derive(Debug)]
pub struct OperatorSettings {
    win_percent: RwLock<Option<f64>>,
    cooldown: Duration,
    max_price_age: Option<Duration>,
    instruments: HashSet<String>,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            win_percent: RwLock::new(None),
            cooldown: Duration::milliseconds(DEFAULT_OPEN_COOLDOWN_MS),
            max_price_age: None,
            instruments: HashSet::new(),
        }
    }
}

impl OperatorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            win_percent: RwLock::new(config.engine.win_percent),
            cooldown: config.cooldown(),
            max_price_age: config.max_price_age(),
            instruments: config
                .engine
                .instruments
                .iter()
                .map(|i| normalize_instrument(i))
                .collect(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_price_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_price_age = max_age;
        self
    }

    pub fn with_instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.instruments = instruments
            .into_iter()
            .map(|i| normalize_instrument(i.as_ref()))
            .collect();
        self
    }

    /// Win percentage in effect (default 80 when unset or not positive)
    pub fn win_percent(&self) -> f64 {
        effective_win_percent(*self.win_percent.read())
    }

    pub fn set_win_percent(&self, win_percent: Option<f64>) {
        *self.win_percent.write() = win_percent;
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn max_price_age(&self) -> Option<Duration> {
        self.max_price_age
    }

    /// An empty allow-list offers every instrument
    pub fn is_offered(&self, instrument: &str) -> bool {
        self.instruments.is_empty() || self.instruments.contains(&normalize_instrument(instrument))
    }
}
