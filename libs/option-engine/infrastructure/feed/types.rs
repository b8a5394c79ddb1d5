//! Binance kline stream message types
//!
//! Combined stream format from wss://stream.binance.com:9443/stream

use serde::Deserialize;

use crate::domain::Kline;

// =============================================================================
// KlineStreamWrapper
// =============================================================================

/// Combined stream envelope
///
/// Example JSON:
/// ```json
/// {
///     "stream": "btcusdt@kline_1m",
///     "data": {
///         "e": "kline", "E": 1672515782136, "s": "BTCUSDT",
///         "k": { "t": 1672515780000, "T": 1672515839999, "i": "1m",
///                "o": "16800.10", "h": "16810.00", "l": "16795.50", "c": "16805.25", "x": false }
///     }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct KlineStreamWrapper {
    pub stream: String,
    pub data: KlineEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (ms since epoch)
    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "k")]
    pub kline: KlineData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineData {
    #[serde(rename = "t")]
    pub open_time: i64,

    #[serde(rename = "T")]
    pub close_time: i64,

    #[serde(rename = "i")]
    pub interval: String,

    #[serde(rename = "o")]
    pub open: String,

    #[serde(rename = "h")]
    pub high: String,

    #[serde(rename = "l")]
    pub low: String,

    #[serde(rename = "c")]
    pub close: String,

    /// Whether this candle is closed
    #[serde(rename = "x", default)]
    pub is_closed: bool,
}

impl KlineEvent {
    /// Convert to the engine's candle, `None` if any price fails to parse
    pub fn to_kline(&self) -> Option<Kline> {
        let k = &self.kline;
        Some(Kline {
            pair: self.symbol.to_uppercase(),
            interval: k.interval.clone(),
            open_time: k.open_time,
            open: k.open.parse().ok()?,
            high: k.high.parse().ok()?,
            low: k.low.parse().ok()?,
            close: k.close.parse().ok()?,
            close_time: k.close_time,
        })
    }
}
