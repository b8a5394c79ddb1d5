//! Application Facade
//!
//! Public API for binaries (presentation layer).
//! Wires storage, cache, services and background tasks from one config.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use super::deposits::DepositService;
use super::scheduler::{SchedulerSettings, SettlementScheduler};
use super::settings::OperatorSettings;
use super::wager_service::WagerService;
use crate::infrastructure::{
    feed::spawn_kline_feed, BroadcastPublisher, EngineConfig, EnginePorts, InMemoryBackend,
    MarketPriceCache, NotificationPublisher, PgStore, SharedClock, SharedPriceCache,
    StorageBackend, SystemClock,
};
use crate::utils::{Heartbeat, ShutdownManager};

/// Application facade for the settlement engine
pub struct SettlementEngine {
    pub config: EngineConfig,
    pub cache: SharedPriceCache,
    pub publisher: Arc<BroadcastPublisher>,
    pub wagers: Arc<WagerService>,
    pub deposits: DepositService,
    pub scheduler: Arc<SettlementScheduler>,
    pub shutdown: ShutdownManager,
    pub heartbeat: Heartbeat,
}

impl SettlementEngine {
    /// Connect the configured storage backend and build every service
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let publisher = Arc::new(BroadcastPublisher::default());
        let transport: Arc<dyn NotificationPublisher> = publisher.clone();

        let ports = match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage (state is lost on restart)");
                InMemoryBackend::new().ports_with_publisher(transport)
            }
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;
                let store = PgStore::connect(url, config.storage.max_connections).await?;
                store.ports(transport)
            }
        };

        let engine = Self::from_parts(config, ports, publisher, Arc::new(SystemClock));
        engine.shutdown.spawn_signal_handler();
        Ok(engine)
    }

    /// Build around ready-made ports; no signal handler is installed
    pub fn from_parts(
        config: EngineConfig,
        ports: EnginePorts,
        publisher: Arc<BroadcastPublisher>,
        clock: SharedClock,
    ) -> Self {
        let cache = Arc::new(MarketPriceCache::new(clock.clone()));
        let settings = Arc::new(OperatorSettings::from_config(&config));
        let wagers = Arc::new(WagerService::new(ports, cache.clone(), clock.clone(), settings));
        let deposits = DepositService::new(wagers.clone());
        let scheduler = Arc::new(SettlementScheduler::new(
            wagers.clone(),
            SchedulerSettings::from_config(&config),
        ));
        let heartbeat = Heartbeat::new(config.heartbeat_interval_secs, clock);

        Self {
            config,
            cache,
            publisher,
            wagers,
            deposits,
            scheduler,
            shutdown: ShutdownManager::new(),
            heartbeat,
        }
    }

    /// Check if app is still running
    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let flag = self.shutdown.flag();
        tokio::spawn(async move { scheduler.run(flag).await })
    }

    /// `None` when the feed is disabled in config
    pub fn spawn_feed(&self) -> Option<JoinHandle<()>> {
        if !self.config.feed.enabled {
            info!("Kline feed disabled, prices must be pushed into the cache");
            return None;
        }

        let transport: Arc<dyn NotificationPublisher> = self.publisher.clone();
        Some(spawn_kline_feed(
            self.config.feed.clone(),
            self.cache.clone(),
            transport,
            self.shutdown.flag(),
        ))
    }

    /// Log a status line if the heartbeat interval elapsed
    pub fn maybe_heartbeat(&mut self) {
        if !self.heartbeat.should_beat() {
            return;
        }

        let pruned = self.cache.prune_expired();
        let cache_stats = self.cache.stats();
        let stats = self.scheduler.stats();
        info!(
            instruments = self.cache.instrument_count(),
            pruned,
            prices_stored = cache_stats.stored(),
            prices_stale = cache_stats.stale(),
            ticks = stats.ticks(),
            settled = stats.settled(),
            waiting_for_price = stats.skipped_no_price(),
            failed = stats.failed(),
            outbox_replayed = stats.outbox_applied(),
            "Heartbeat"
        );
        self.heartbeat.beat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Interval, Wallet};
    use crate::infrastructure::ManualClock;

    #[tokio::test]
    async fn test_from_parts_wires_shared_cache_and_stores() {
        let backend = InMemoryBackend::new();
        backend.wallets.seed(
            "acc",
            Wallet {
                balance: 50.0,
                ..Wallet::default()
            },
        );
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut config = EngineConfig::default();
        config.feed.enabled = false;

        let engine = SettlementEngine::from_parts(
            config,
            backend.ports_with_publisher(publisher.clone()),
            publisher.clone(),
            Arc::new(ManualClock::at_millis(1_700_000_000_000)),
        );
        let mut updates = publisher.subscribe();

        engine.cache.on_price_update("BTCUSDT", 100.0, 1_700_000_000_000);
        engine
            .wagers
            .open("acc", "BTCUSDT", 5.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        assert_eq!(backend.wallets.peek("acc").unwrap().balance, 45.0);
        assert_eq!(updates.recv().await.unwrap().topic, "bets/acc");
        assert!(engine.spawn_feed().is_none());
        assert!(engine.is_running());
    }
}
