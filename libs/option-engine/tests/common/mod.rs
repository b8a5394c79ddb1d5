//! Common test utilities for option-engine integration tests
//!
//! Builds a fully wired engine on the in-memory stores with a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use option_engine::application::{
    DepositService, OperatorSettings, SchedulerSettings, SettlementScheduler, WagerService,
};
use option_engine::domain::{AccountProfile, AffiliateTerms, Wallet};
use option_engine::infrastructure::{
    Clock, InMemoryBackend, ManualClock, MarketPriceCache, SharedPriceCache,
};

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub backend: InMemoryBackend,
    pub cache: SharedPriceCache,
    pub wagers: Arc<WagerService>,
    pub deposits: DepositService,
    pub scheduler: SettlementScheduler,
}

impl Harness {
    /// No cooldown so tests can open back to back
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::at_millis(T0));
        let backend = InMemoryBackend::new();
        let cache = Arc::new(MarketPriceCache::new(clock.clone()));
        let settings = OperatorSettings::default().with_cooldown(Duration::zero());
        let wagers = Arc::new(WagerService::new(
            backend.ports(),
            cache.clone(),
            clock.clone(),
            Arc::new(settings),
        ));
        let deposits = DepositService::new(wagers.clone());
        let scheduler = SettlementScheduler::new(wagers.clone(), SchedulerSettings::default());

        Self {
            clock,
            backend,
            cache,
            wagers,
            deposits,
            scheduler,
        }
    }

    pub fn fund(&self, account_id: &str, balance: f64) {
        self.backend.wallets.seed(
            account_id,
            Wallet {
                balance,
                ..Wallet::default()
            },
        );
    }

    /// Price observed "now" on the manual clock
    pub fn price(&self, instrument: &str, price: f64) {
        let now = self.clock.now().timestamp_millis();
        self.cache.on_price_update(instrument, price, now);
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    pub fn balance(&self, account_id: &str) -> f64 {
        self.backend.wallets.peek(account_id).map(|w| w.balance).unwrap_or(0.0)
    }

    pub fn affiliate(&self, account_id: &str) -> f64 {
        self.backend
            .wallets
            .peek(account_id)
            .map(|w| w.affiliate_earnings)
            .unwrap_or(0.0)
    }
}

pub mod fixtures {
    //! Referral trees used across tests

    use super::*;

    pub fn revshare_terms() -> AffiliateTerms {
        AffiliateTerms {
            cpa: 5.0,
            revenue_share_percent: 20.0,
            percent_per_deposit: 10.0,
        }
    }

    /// `player` referred by `affiliate`, who is referred by `master`
    pub fn two_level_tree(harness: &Harness) {
        let directory = &harness.backend.directory;
        directory.insert(AccountProfile::new("master"));
        directory.insert(
            AccountProfile::new("affiliate")
                .referred_by("master")
                .with_terms(revshare_terms()),
        );
        directory.insert(AccountProfile::new("player").referred_by("affiliate"));

        harness.backend.wallets.open_account("master");
        harness.backend.wallets.open_account("affiliate");
    }
}
