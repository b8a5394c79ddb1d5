//! Connects to the Binance kline stream and prints what the cache sees.
//!
//! Usage: kline-feed-probe [--config <path>] [message_limit]

use anyhow::{Context, Result};
use corretora_engine::bin_common::{
    parse_args, positional_args, print_banner, print_shutdown, resolve_config_path, ConfigType,
    RunConfig,
};
use option_engine::infrastructure::{
    feed::spawn_kline_feed, BroadcastPublisher, EngineConfig, MarketPriceCache, SystemClock,
};
use option_engine::{init_tracing, ShutdownManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    let limit: Option<u64> = positional_args(&args)
        .first()
        .map(|arg| arg.parse())
        .transpose()
        .context("message limit must be a positive integer")?;

    // Storage settings are irrelevant here, so skip the DATABASE_URL check
    let config_path = resolve_config_path(&args, ConfigType::Engine)?;
    let config = if config_path.exists() {
        let yaml = std::fs::read_to_string(&config_path)?;
        let config = EngineConfig::from_yaml(&yaml)?;
        config.validate()?;
        config
    } else {
        EngineConfig::default()
    };

    init_tracing(&config.log_level);

    let mut run = RunConfig::new("Kline Feed Probe").with_detail("Pairs", config.feed.pairs.join(", "));
    if let Some(limit) = limit {
        run = run.with_detail("Stop after", limit);
    }
    print_banner(&run);

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    let cache = Arc::new(MarketPriceCache::new(Arc::new(SystemClock)));
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut klines = publisher.subscribe();

    let mut feed_config = config.feed.clone();
    feed_config.enabled = true;
    let feed = spawn_kline_feed(feed_config, cache.clone(), publisher.clone(), shutdown.flag());

    let mut received: u64 = 0;
    while shutdown.is_running() {
        match timeout(Duration::from_secs(1), klines.recv()).await {
            Ok(Ok(notification)) => {
                received += 1;
                match notification.payload() {
                    Ok(payload) => info!("[{}] {}", notification.topic, payload),
                    Err(e) => warn!("[{}] unserializable: {}", notification.topic, e),
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => warn!("Probe lagging, skipped {} messages", skipped),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => continue,
        }

        if limit.is_some_and(|limit| received >= limit) {
            shutdown.request_shutdown();
        }
    }

    if let Err(e) = feed.await {
        warn!("Feed task ended abnormally: {}", e);
    }

    for sample in cache.snapshot() {
        info!(
            "{:>10} {:>14.4} observed {}",
            sample.instrument,
            sample.price,
            sample.observed_at.format("%H:%M:%S%.3f")
        );
    }

    print_shutdown(&run, Some(&format!("Klines received: {}", received)));
    Ok(())
}
