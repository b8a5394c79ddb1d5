//! Application Layer
//!
//! Use cases: opening and settling wagers, the referral cascade, deposit
//! approval and the settlement scheduler.
//! This layer depends on domain and infrastructure layers.

pub mod deposits;
pub mod effects;
pub mod facade;
pub mod referral;
pub mod scheduler;
pub mod settings;
pub mod wager_service;

// Re-export application facade for binaries
pub use facade::SettlementEngine;

// Re-export use cases
pub use deposits::DepositService;
pub use effects::{ApplyReport, DrainReport, EffectApplier};
pub use referral::ReferralCascade;
pub use scheduler::{SchedulerSettings, SchedulerStats, SettlementScheduler, TickReport};
pub use settings::OperatorSettings;
pub use wager_service::{OpenWagerRequest, Settlement, WagerService};
