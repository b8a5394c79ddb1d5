//! Binance kline price feed

pub mod types;
pub mod websocket;

pub use types::{KlineData, KlineEvent, KlineStreamWrapper};
pub use websocket::{build_stream_url, run_kline_feed, spawn_kline_feed, FeedError, KlineHandler};
