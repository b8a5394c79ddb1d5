//! Option Engine
//!
//! Settlement core for short-dated binary option wagers on crypto pairs:
//! live prices from Binance klines, wager lifecycle, payout curve, a
//! two-level referral cascade and deposit approval.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod utils;

// Re-export commonly used items
pub use application::{
    DepositService, OpenWagerRequest, OperatorSettings, SettlementEngine, SettlementScheduler,
    TickReport, WagerService,
};
pub use domain::{
    Direction, EngineError, Interval, Notification, StoreError, Wager, WagerStatus, Wallet,
};
pub use infrastructure::{
    init_tracing, BroadcastPublisher, EngineConfig, InMemoryBackend, MarketPriceCache, PgStore,
};
pub use utils::{Heartbeat, ShutdownManager};
