//! Domain Layer
//!
//! Contains pure business entities, errors and the payout curve.
//! This layer has no dependencies on infrastructure or application layers.

pub mod affiliate;
pub mod deposit;
pub mod effects;
pub mod errors;
pub mod events;
pub mod payout;
pub mod price;
pub mod wager;
pub mod wallet;

// Re-export domain entities
pub use affiliate::{
    AccountProfile, AffiliateTerms, CommissionKind, CommissionLedgerEntry, MAX_CASCADE_DEPTH,
    SUB_AFFILIATE_PERCENT,
};
pub use deposit::{DepositStatus, DepositTransaction};
pub use effects::{Effect, OutboxItem};
pub use errors::{EngineError, StoreError};
pub use events::{EngineEvent, Notification};
pub use price::{normalize_instrument, Kline, PriceSample};
pub use wager::{Direction, Interval, Resolution, SettledVia, Wager, WagerStatus};
pub use wallet::{BalanceClass, StakeFunding, Wallet};
