use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest observed price of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub instrument: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// One candle update from the exchange stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub pair: String,
    pub interval: String,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub close_time: i64,
}

/// Canonical instrument key ("btc/usdt" and "BTCUSDT" are the same pair)
pub fn normalize_instrument(instrument: &str) -> String {
    instrument.trim().replace('/', "").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_instrument() {
        assert_eq!(normalize_instrument("btc/usdt"), "BTCUSDT");
        assert_eq!(normalize_instrument(" ethusdt "), "ETHUSDT");
    }
}
