//! Infrastructure Layer
//!
//! Price cache, clock, storage adapters, configuration and the exchange feed.

pub mod clock;
pub mod config;
pub mod database;
pub mod feed;
pub mod logging;
pub mod memory;
pub mod ports;
pub mod price_cache;
pub mod publisher;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, EngineConfig, StorageBackend};
pub use database::PgStore;
pub use logging::init_tracing;
pub use memory::{FailureSwitch, InMemoryBackend, RecordingPublisher};
pub use ports::{
    DepositStore, EnginePorts, LedgerStore, NotificationPublisher, OutboxStore, ReferralDirectory,
    StoreResult, WagerStore, WalletMutator,
};
pub use price_cache::{CachedPrice, MarketPriceCache, SharedPriceCache, UpdateOutcome};
pub use publisher::BroadcastPublisher;
