//! WebSocket client for Binance kline streams
//!
//! Every kline update overwrites the instrument's cached price with the
//! candle close and is forwarded to subscribers on `klines/<PAIR>/<interval>`.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::types::KlineStreamWrapper;
use crate::domain::{Kline, Notification};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::ports::NotificationPublisher;
use crate::infrastructure::price_cache::{SharedPriceCache, UpdateOutcome};

/// How long a read may block before the shutdown flag is re-checked
const SHUTDOWN_POLL_SECS: u64 = 1;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Stream closed by server")]
    Closed,
}

// =============================================================================
// URL Builder
// =============================================================================

/// Combined stream URL for every pair/interval combination
pub fn build_stream_url(base_url: &str, pairs: &[String], intervals: &[String]) -> String {
    let streams: Vec<String> = pairs
        .iter()
        .flat_map(|pair| {
            intervals
                .iter()
                .map(move |interval| format!("{}@kline_{}", pair.to_lowercase(), interval))
        })
        .collect();

    format!("{}?streams={}", base_url, streams.join("/"))
}

// =============================================================================
// Handler - Processes kline messages
// =============================================================================

pub struct KlineHandler {
    cache: SharedPriceCache,
    publisher: Arc<dyn NotificationPublisher>,
    message_count: AtomicU64,
}

impl KlineHandler {
    pub fn new(cache: SharedPriceCache, publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self {
            cache,
            publisher,
            message_count: AtomicU64::new(0),
        }
    }

    /// Apply one text frame; returns the candle when it was understood
    pub fn handle_text(&self, text: &str) -> Option<Kline> {
        let count = self.message_count.fetch_add(1, Ordering::Relaxed) + 1;

        let wrapper = match serde_json::from_str::<KlineStreamWrapper>(text) {
            Ok(w) => w,
            Err(e) => {
                debug!("[Binance WS] Parse error: {} - {}", e, text);
                return None;
            }
        };

        if wrapper.data.event_type != "kline" {
            debug!("[Binance WS] Non-kline event: {}", wrapper.data.event_type);
            return None;
        }

        let kline = match wrapper.data.to_kline() {
            Some(k) => k,
            None => {
                warn!("[Binance WS] Invalid kline prices on {}", wrapper.stream);
                return None;
            }
        };

        let outcome = self
            .cache
            .on_price_update(&kline.pair, kline.close, wrapper.data.event_time);
        if outcome == UpdateOutcome::Rejected {
            return None;
        }

        self.publisher.publish(Notification::kline(kline.clone()));

        // Log periodically to avoid spam
        if count % 1000 == 0 {
            debug!(
                "[Binance WS] {} {} close={:.2} (count: {})",
                kline.pair, kline.interval, kline.close, count
            );
        }

        Some(kline)
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Main Feed Loop
// =============================================================================

/// Spawn the kline feed with reconnection in a background task
pub fn spawn_kline_feed(
    config: FeedConfig,
    cache: SharedPriceCache,
    publisher: Arc<dyn NotificationPublisher>,
    shutdown_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let url = build_stream_url(&config.base_url, &config.pairs, &config.intervals);

    info!("================================================================");
    info!("  STARTING BINANCE KLINE FEED");
    info!("================================================================");
    info!("  URL: {}", url);
    info!("  Pairs: {}", config.pairs.join(", "));
    info!("  Intervals: {}", config.intervals.join(", "));
    info!("  Reconnect delay: {}s", config.reconnect_delay_secs);
    info!("================================================================");

    let handler = KlineHandler::new(cache, publisher);
    let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);

    tokio::spawn(async move {
        run_kline_feed(&url, &handler, reconnect_delay, shutdown_flag).await;
        info!("[Binance WS] Feed stopped after {} messages", handler.message_count());
    })
}

/// Connect, read until the stream drops, wait, repeat; stops on shutdown
pub async fn run_kline_feed(
    url: &str,
    handler: &KlineHandler,
    reconnect_delay: Duration,
    shutdown_flag: Arc<AtomicBool>,
) {
    let mut attempt: u64 = 0;

    while shutdown_flag.load(Ordering::Acquire) {
        if attempt > 0 {
            info!("[Binance WS] Reconnecting in {:?} (attempt {})", reconnect_delay, attempt);
            sleep(reconnect_delay).await;
            if !shutdown_flag.load(Ordering::Acquire) {
                break;
            }
        }
        attempt += 1;

        match read_stream(url, handler, &shutdown_flag).await {
            Ok(()) => break,
            Err(e) => warn!("[Binance WS] Disconnected: {}", e),
        }
    }
}

/// One connection; `Ok` only when shutdown was requested
async fn read_stream(url: &str, handler: &KlineHandler, shutdown_flag: &AtomicBool) -> Result<(), FeedError> {
    debug!("[Binance WS] Connecting to: {}", url);
    let (ws_stream, _) = connect_async(url).await?;
    info!("[Binance WS] Connected to kline feed");

    let (mut write, mut read) = ws_stream.split();

    loop {
        if !shutdown_flag.load(Ordering::Acquire) {
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }

        let next = match timeout(Duration::from_secs(SHUTDOWN_POLL_SECS), read.next()).await {
            Ok(next) => next,
            Err(_) => continue,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                handler.handle_text(&text);
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => return Err(FeedError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::memory::RecordingPublisher;
    use crate::infrastructure::price_cache::MarketPriceCache;

    fn handler() -> (SharedPriceCache, Arc<RecordingPublisher>, KlineHandler) {
        let cache = Arc::new(MarketPriceCache::new(Arc::new(ManualClock::at_millis(1_672_515_782_000))));
        let publisher = Arc::new(RecordingPublisher::new());
        let handler = KlineHandler::new(cache.clone(), publisher.clone());
        (cache, publisher, handler)
    }

    fn message(symbol: &str, event_time: i64, close: &str) -> String {
        format!(
            r#"{{"stream":"{lower}@kline_1m","data":{{"e":"kline","E":{event_time},"s":"{symbol}","k":{{"t":1672515780000,"T":1672515839999,"i":"1m","o":"1.0","h":"2.0","l":"0.5","c":"{close}","x":false}}}}}}"#,
            lower = symbol.to_lowercase(),
            symbol = symbol,
            event_time = event_time,
            close = close
        )
    }

    #[test]
    fn test_build_stream_url() {
        let url = build_stream_url(
            "wss://stream.binance.com:9443/stream",
            &["BTCUSDT".to_string(), "ethusdt".to_string()],
            &["1m".to_string(), "5m".to_string()],
        );
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@kline_1m/btcusdt@kline_5m/ethusdt@kline_1m/ethusdt@kline_5m"
        );
    }

    #[test]
    fn test_kline_updates_cache_and_publishes() {
        let (cache, publisher, handler) = handler();

        let kline = handler.handle_text(&message("BTCUSDT", 1672515782136, "16805.25")).unwrap();

        assert_eq!(kline.pair, "BTCUSDT");
        let cached = cache.latest("btcusdt").unwrap();
        assert!((cached.sample.price - 16805.25).abs() < 1e-9);
        assert_eq!(cached.sample.observed_at.timestamp_millis(), 1672515782136);
        assert_eq!(publisher.topics(), vec!["klines/BTCUSDT/1m"]);
    }

    #[test]
    fn test_garbage_is_ignored() {
        let (cache, publisher, handler) = handler();

        assert!(handler.handle_text("not json").is_none());
        assert!(handler.handle_text(&message("BTCUSDT", 1, "0")).is_none());
        assert_eq!(cache.instrument_count(), 0);
        assert!(publisher.published().is_empty());
        assert_eq!(handler.message_count(), 2);
    }
}
