//! Wager domain entities
//!
//! A wager is a single stake on the direction of an instrument's price over a
//! fixed interval. It is created `Pending` and written terminal exactly once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::EngineError;

// ==================== DIRECTION ====================

/// Predicted price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction actually observed between two prices; `None` when unchanged
    pub fn observed(entry_price: f64, price: f64) -> Option<Self> {
        if price > entry_price {
            Some(Direction::Up)
        } else if price < entry_price {
            Some(Direction::Down)
        } else {
            None
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl FromStr for Direction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(EngineError::InvalidDirection(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== INTERVAL ====================

/// Wager duration; only these three are offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
}

impl Interval {
    pub fn minutes(&self) -> i64 {
        match self {
            Interval::OneMinute => 1,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
        }
    }

    pub fn all() -> &'static [Interval] {
        &[
            Interval::OneMinute,
            Interval::FiveMinutes,
            Interval::FifteenMinutes,
        ]
    }
}

impl FromStr for Interval {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            _ => Err(EngineError::InvalidInterval(s.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== STATUS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "PENDING",
            WagerStatus::Won => "WON",
            WagerStatus::Lost => "LOST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WagerStatus::Pending),
            "WON" => Some(WagerStatus::Won),
            "LOST" => Some(WagerStatus::Lost),
            _ => None,
        }
    }
}

/// Which path closed the wager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettledVia {
    CashOut,
    Maturity,
}

impl SettledVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettledVia::CashOut => "CASH_OUT",
            SettledVia::Maturity => "MATURITY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CASH_OUT" => Some(SettledVia::CashOut),
            "MATURITY" => Some(SettledVia::Maturity),
            _ => None,
        }
    }
}

// ==================== WAGER ====================

/// One option contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub account_id: String,
    pub instrument: String,
    pub interval: Interval,
    pub direction: Direction,
    pub stake: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub status: WagerStatus,
    pub settlement_amount: f64,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub is_demo: bool,
    pub finished: bool,
    pub settled_via: Option<SettledVia>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    /// Build a fresh pending wager
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: impl Into<String>,
        instrument: impl Into<String>,
        interval: Interval,
        direction: Direction,
        stake: f64,
        entry_price: f64,
        created_at: DateTime<Utc>,
        is_demo: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            instrument: instrument.into(),
            interval,
            direction,
            stake,
            entry_price,
            exit_price: None,
            status: WagerStatus::Pending,
            settlement_amount: 0.0,
            created_at,
            matures_at: created_at + interval.duration(),
            is_demo,
            finished: false,
            settled_via: None,
            settled_at: None,
        }
    }

    /// Whether the wager can still be claimed by a settlement path
    pub fn is_open(&self) -> bool {
        !self.finished && self.status == WagerStatus::Pending
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.matures_at <= now
    }

    /// Net result for the account (payout minus stake)
    pub fn profit(&self) -> f64 {
        self.settlement_amount - self.stake
    }

    /// Apply a terminal resolution to this value (the store does this under CAS)
    pub fn apply(&mut self, resolution: &Resolution) {
        self.status = resolution.status;
        self.exit_price = Some(resolution.exit_price);
        self.settlement_amount = resolution.settlement_amount;
        self.settled_via = Some(resolution.via);
        self.settled_at = Some(resolution.settled_at);
        self.finished = true;
    }
}

/// Terminal write computed by a settlement path before claiming the wager
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: WagerStatus,
    pub exit_price: f64,
    pub settlement_amount: f64,
    pub via: SettledVia,
    pub settled_at: DateTime<Utc>,
}
