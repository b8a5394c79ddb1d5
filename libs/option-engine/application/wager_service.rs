//! Wager State Machine
//!
//! `Pending -> Won | Lost`, nothing else. Opening is the only place money
//! leaves a wallet for a wager; cash-out and maturity settlement race for
//! the terminal transition through the store's compare-and-set, and only
//! the winner moves money. The claim writes the winner's effects to the
//! outbox in the same step, so a crash after it loses nothing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::effects::{ApplyReport, EffectApplier};
use super::referral::ReferralCascade;
use super::settings::OperatorSettings;
use crate::domain::errors::Result;
use crate::domain::payout::{self, CurveInputs, PayoutQuote};
use crate::domain::{
    normalize_instrument, BalanceClass, Direction, Effect, EngineError, Interval, Notification,
    Resolution, SettledVia, Wager,
};
use crate::infrastructure::clock::SharedClock;
use crate::infrastructure::ports::EnginePorts;
use crate::infrastructure::price_cache::SharedPriceCache;

/// Raw open request as received from a client
#[derive(Debug, Clone, PartialEq)]
pub struct OpenWagerRequest {
    pub account_id: String,
    pub instrument: String,
    pub stake: f64,
    /// "up" or "down"
    pub direction: String,
    /// "1m", "5m" or "15m"
    pub interval: String,
    pub is_demo: bool,
}

/// A terminal transition this caller won
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub wager: Wager,
    /// Effects left in the outbox for the scheduler
    pub deferred_effects: usize,
}

pub struct WagerService {
    ports: EnginePorts,
    cache: SharedPriceCache,
    clock: SharedClock,
    settings: Arc<OperatorSettings>,
    cascade: ReferralCascade,
    effects: EffectApplier,
    /// Last accepted open per account
    cooldowns: DashMap<String, DateTime<Utc>>,
}

impl WagerService {
    pub fn new(
        ports: EnginePorts,
        cache: SharedPriceCache,
        clock: SharedClock,
        settings: Arc<OperatorSettings>,
    ) -> Self {
        let cascade = ReferralCascade::new(ports.directory.clone(), clock.clone());
        let effects = EffectApplier::new(
            ports.wallets.clone(),
            ports.ledger.clone(),
            ports.outbox.clone(),
            clock.clone(),
        );

        Self {
            ports,
            cache,
            clock,
            settings,
            cascade,
            effects,
            cooldowns: DashMap::new(),
        }
    }

    pub fn ports(&self) -> &EnginePorts {
        &self.ports
    }

    pub fn cache(&self) -> &SharedPriceCache {
        &self.cache
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn settings(&self) -> &Arc<OperatorSettings> {
        &self.settings
    }

    pub fn effects(&self) -> &EffectApplier {
        &self.effects
    }

    pub fn cascade(&self) -> &ReferralCascade {
        &self.cascade
    }

    // ==================== OPEN ====================

    /// Validate, fund and persist a new wager
    pub async fn open(
        &self,
        account_id: &str,
        instrument: &str,
        stake: f64,
        interval: Interval,
        direction: Direction,
        is_demo: bool,
    ) -> Result<Wager> {
        if !stake.is_finite() || stake <= 0.0 {
            return Err(EngineError::InvalidStake(stake));
        }

        let instrument = normalize_instrument(instrument);
        if !self.settings.is_offered(&instrument) {
            return Err(EngineError::UnknownInstrument(instrument));
        }

        let now = self.clock.now();
        let previous = self.reserve_cooldown(account_id, now)?;

        match self
            .open_reserved(account_id, &instrument, stake, interval, direction, is_demo, now)
            .await
        {
            Ok(wager) => Ok(wager),
            Err(e) => {
                self.release_cooldown(account_id, now, previous);
                if !e.is_validation() {
                    warn!(account_id, instrument = %instrument, reason = e.reason(), error = %e, "Open rejected");
                }
                Err(e)
            }
        }
    }

    /// Parse a raw request and open it
    pub async fn open_request(&self, request: OpenWagerRequest) -> Result<Wager> {
        let direction: Direction = request.direction.parse()?;
        let interval: Interval = request.interval.parse()?;

        self.open(
            &request.account_id,
            &request.instrument,
            request.stake,
            interval,
            direction,
            request.is_demo,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_reserved(
        &self,
        account_id: &str,
        instrument: &str,
        stake: f64,
        interval: Interval,
        direction: Direction,
        is_demo: bool,
        now: DateTime<Utc>,
    ) -> Result<Wager> {
        let entry = self
            .cache
            .latest_fresh(instrument, self.settings.max_price_age())
            .ok_or_else(|| EngineError::NoPriceAvailable(instrument.to_string()))?;

        let funding = self.ports.wallets.fund_stake(account_id, stake, is_demo).await?;

        let wager = Wager::new(
            account_id,
            instrument,
            interval,
            direction,
            stake,
            entry.sample.price,
            now,
            is_demo,
        );

        if let Err(e) = self.ports.wagers.save(&wager).await {
            error!(wager_id = %wager.id, account_id, error = %e, "Failed to save wager, refunding stake");
            if let Err(refund_err) = self.ports.wallets.refund_stake(account_id, &funding).await {
                error!(
                    account_id,
                    funding = ?funding,
                    error = %refund_err,
                    "Stake refund failed, manual correction required"
                );
            }
            return Err(e.into());
        }

        info!(
            wager_id = %wager.id,
            account_id,
            instrument,
            direction = %direction,
            interval = %interval,
            stake,
            entry_price = wager.entry_price,
            is_demo,
            "Wager opened"
        );

        self.ports.publisher.publish(Notification::wager_opened(&wager));
        self.notify_accounts(&[account_id.to_string()]).await;

        Ok(wager)
    }

    /// Claim the account's open slot; returns the previous open time
    fn reserve_cooldown(&self, account_id: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let cooldown = self.settings.cooldown();

        match self.cooldowns.entry(account_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let elapsed = now - *slot.get();
                if elapsed < cooldown {
                    return Err(EngineError::CooldownActive {
                        remaining_ms: (cooldown - elapsed).num_milliseconds(),
                    });
                }
                let previous = slot.insert(now);
                Ok(Some(previous))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(None)
            }
        }
    }

    /// Undo a reservation that did not turn into a wager
    fn release_cooldown(&self, account_id: &str, reserved_at: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        match previous {
            Some(previous) => {
                if let Some(mut slot) = self.cooldowns.get_mut(account_id) {
                    if *slot == reserved_at {
                        *slot = previous;
                    }
                }
            }
            None => {
                self.cooldowns.remove_if(account_id, |_, at| *at == reserved_at);
            }
        }
    }

    // ==================== SETTLE ====================

    /// Early settlement at the current cached price
    pub async fn cash_out(&self, wager_id: &str) -> Result<Settlement> {
        let wager = self.load_open(wager_id).await?;

        let cached = self
            .cache
            .latest_fresh(&wager.instrument, self.settings.max_price_age())
            .ok_or_else(|| EngineError::NoPriceAvailable(wager.instrument.clone()))?;
        let price = cached.sample.price;

        let quote = payout::early_cash_out(&CurveInputs {
            stake: wager.stake,
            entry_price: wager.entry_price,
            price,
            direction: wager.direction,
            win_percent: self.settings.win_percent(),
            created_at: wager.created_at,
            matures_at: wager.matures_at,
            now: self.clock.now(),
        });

        self.finalize(&wager, quote, price, SettledVia::CashOut).await
    }

    /// Binary settlement at maturity, driven by the scheduler
    ///
    /// `NotMatured` before `matures_at` on the engine clock.
    pub async fn settle_at_maturity(&self, wager_id: &str, reference_price: f64) -> Result<Settlement> {
        let wager = self.load_open(wager_id).await?;

        let now = self.clock.now();
        if now < wager.matures_at {
            return Err(EngineError::NotMatured {
                wager_id: wager.id.clone(),
                remaining_ms: (wager.matures_at - now).num_milliseconds(),
            });
        }

        let quote = payout::at_maturity(
            wager.stake,
            wager.entry_price,
            reference_price,
            wager.direction,
            self.settings.win_percent(),
        );

        self.finalize(&wager, quote, reference_price, SettledVia::Maturity).await
    }

    /// Maturity settlement at the latest cached price, whatever its age
    pub async fn settle_at_latest_price(&self, wager_id: &str) -> Result<Settlement> {
        let wager = self.load_open(wager_id).await?;
        let cached = self
            .cache
            .latest(&wager.instrument)
            .ok_or_else(|| EngineError::NoPriceAvailable(wager.instrument.clone()))?;

        self.settle_at_maturity(&wager.id, cached.sample.price).await
    }

    pub async fn open_wagers(&self, account_id: &str) -> Result<Vec<Wager>> {
        Ok(self.ports.wagers.open_for_account(account_id).await?)
    }

    async fn load_open(&self, wager_id: &str) -> Result<Wager> {
        let wager = self
            .ports
            .wagers
            .get(wager_id)
            .await?
            .ok_or_else(|| EngineError::WagerNotFound(wager_id.to_string()))?;

        if !wager.is_open() {
            return Err(EngineError::AlreadySettled(wager_id.to_string()));
        }
        Ok(wager)
    }

    async fn finalize(&self, wager: &Wager, quote: PayoutQuote, price: f64, via: SettledVia) -> Result<Settlement> {
        // Read-only lookups happen before the claim so a failure leaves the wager open
        let commissions = self.cascade.plan_for_wager(wager, quote.status).await?;

        let resolution = Resolution {
            status: quote.status,
            exit_price: price,
            settlement_amount: quote.amount,
            via,
            settled_at: self.clock.now(),
        };

        let mut effects = Vec::with_capacity(commissions.len() + 1);
        if quote.amount > 0.0 {
            effects.push(Effect::Credit {
                account_id: wager.account_id.clone(),
                class: BalanceClass::payout_class(wager.is_demo),
                amount: quote.amount,
            });
        }
        effects.extend(commissions);
        let items = self.effects.record(&wager.id, &effects);

        let settled = match self.ports.wagers.claim(&wager.id, &resolution, &items).await {
            Ok(Some(settled)) => settled,
            Ok(None) => return Err(EngineError::AlreadySettled(wager.id.clone())),
            Err(e) => {
                // Either nothing was written or the claim and its effects both were
                error!(wager_id = %wager.id, via = via.as_str(), error = %e, "Settlement write failed");
                return Err(EngineError::DownstreamWriteFailure {
                    operation_id: wager.id.clone(),
                    source: e,
                });
            }
        };

        let report = self.effects.apply_all(&items).await;

        info!(
            wager_id = %settled.id,
            account_id = %settled.account_id,
            via = via.as_str(),
            status = settled.status.as_str(),
            exit_price = price,
            payout = quote.amount,
            profit = settled.profit(),
            deferred = report.deferred,
            "Wager settled"
        );

        self.publish_settlement(&settled, &report).await;

        Ok(Settlement {
            wager: settled,
            deferred_effects: report.deferred,
        })
    }

    async fn publish_settlement(&self, settled: &Wager, report: &ApplyReport) {
        self.ports.publisher.publish(Notification::wager_settled(settled));
        self.notify_accounts(&report.touched_accounts).await;
    }

    /// Push the current wallet of every account; best-effort
    pub async fn notify_accounts(&self, accounts: &[String]) {
        for account_id in accounts {
            let wallet = match self.ports.wallets.wallet(account_id).await {
                Ok(wallet) => Some(wallet),
                Err(e) => {
                    debug!(account_id = %account_id, error = %e, "Wallet unavailable for notification");
                    None
                }
            };
            self.ports
                .publisher
                .publish(Notification::account_updated(account_id, wallet));
        }
    }
}

impl std::fmt::Debug for WagerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WagerService")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .field("cooldowns", &self.cooldowns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Wallet, WagerStatus};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::memory::InMemoryBackend;
    use crate::infrastructure::ports::WagerStore;
    use crate::infrastructure::price_cache::MarketPriceCache;
    use chrono::Duration;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        backend: InMemoryBackend,
        cache: SharedPriceCache,
        service: WagerService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_millis(T0));
        let backend = InMemoryBackend::new();
        let cache = Arc::new(MarketPriceCache::new(clock.clone()));
        let service = WagerService::new(
            backend.ports(),
            cache.clone(),
            clock.clone(),
            Arc::new(OperatorSettings::default()),
        );
        backend.wallets.seed(
            "acc",
            Wallet {
                demo: 10_000.0,
                deposit: 0.0,
                balance: 100.0,
                bonus: 0.0,
                affiliate_earnings: 0.0,
            },
        );
        Fixture {
            clock,
            backend,
            cache,
            service,
        }
    }

    #[tokio::test]
    async fn test_open_debits_and_publishes() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);

        let wager = f
            .service
            .open("acc", "btcusdt", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        assert_eq!(wager.entry_price, 100.0);
        assert_eq!(wager.matures_at - wager.created_at, Duration::minutes(1));
        assert_eq!(f.backend.wallets.peek("acc").unwrap().balance, 90.0);
        assert_eq!(f.backend.publisher.topics(), vec!["bets/acc", "account/acc"]);
    }

    #[tokio::test]
    async fn test_validation_happens_before_money_moves() {
        let f = fixture();

        let err = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoPriceAvailable(_)));

        let err = f
            .service
            .open("acc", "BTCUSDT", -1.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStake(_)));

        assert_eq!(f.backend.wallets.peek("acc").unwrap().balance, 100.0);
        assert!(f.backend.wagers.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_rapid_opens_but_not_failed_ones() {
        let f = fixture();

        // A failed attempt does not start the cooldown
        assert!(f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .is_err());

        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        f.service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        f.clock.advance(Duration::milliseconds(500));
        let err = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::CooldownActive { remaining_ms: 1_500 });

        f.clock.advance(Duration::milliseconds(1_500));
        assert!(f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_save_refunds_stake() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        f.backend.wagers.failures.fail_next(1);

        let err = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(f.backend.wallets.peek("acc").unwrap().balance, 100.0);
    }

    #[tokio::test]
    async fn test_open_request_maps_parse_errors() {
        let f = fixture();
        let request = OpenWagerRequest {
            account_id: "acc".to_string(),
            instrument: "BTCUSDT".to_string(),
            stake: 10.0,
            direction: "sideways".to_string(),
            interval: "1m".to_string(),
            is_demo: false,
        };

        let err = f.service.open_request(request.clone()).await.unwrap_err();
        assert_eq!(err.reason(), "INVALID_DIRECTION");

        let err = f
            .service
            .open_request(OpenWagerRequest {
                direction: "up".to_string(),
                interval: "2m".to_string(),
                ..request
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "INVALID_INTERVAL");
    }

    #[tokio::test]
    async fn test_cash_out_then_settle_is_already_settled() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        let wager = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        f.cache.on_price_update("BTCUSDT", 100.1, T0 + 1);
        let settlement = f.service.cash_out(&wager.id).await.unwrap();
        assert_eq!(settlement.wager.status, WagerStatus::Won);
        assert!((settlement.wager.settlement_amount - 10.5).abs() < 1e-9);
        assert!((f.backend.wallets.peek("acc").unwrap().balance - 100.5).abs() < 1e-9);

        let err = f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadySettled(_)));
        let err = f.service.cash_out(&wager.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadySettled(_)));
        assert!((f.backend.wallets.peek("acc").unwrap().balance - 100.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_wager() {
        let f = fixture();
        let err = f.service.cash_out("nope").await.unwrap_err();
        assert_eq!(err.reason(), "WAGER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_demo_payout_goes_to_demo() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        let wager = f
            .service
            .open("acc", "BTCUSDT", 100.0, Interval::OneMinute, Direction::Down, true)
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(1));
        f.service.settle_at_maturity(&wager.id, 95.0).await.unwrap();

        let wallet = f.backend.wallets.peek("acc").unwrap();
        assert!((wallet.demo - (10_000.0 - 100.0 + 180.0)).abs() < 1e-9);
        assert_eq!(wallet.balance, 100.0);
    }

    #[tokio::test]
    async fn test_maturity_settlement_waits_for_matures_at() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        let wager = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(59));
        let err = f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::NotMatured {
                wager_id: wager.id.clone(),
                remaining_ms: 1_000,
            }
        );
        assert!(f.backend.wagers.get(&wager.id).await.unwrap().unwrap().is_open());
        assert_eq!(f.backend.wallets.peek("acc").unwrap().balance, 90.0);

        f.clock.advance(Duration::seconds(1));
        let settlement = f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap();
        assert_eq!(settlement.wager.status, WagerStatus::Won);
    }

    #[tokio::test]
    async fn test_claimed_payout_survives_wallet_and_ledger_outage() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        let wager = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(1));
        f.backend.wallets.failures.set_offline(true);
        f.backend.ledger.failures.set_offline(true);

        let settlement = f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap();
        assert!(settlement.wager.finished);
        assert_eq!(settlement.deferred_effects, 1);

        // The claim already recorded the payout
        let queued = f.backend.outbox.items();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].operation_id, wager.id);
        assert!(matches!(queued[0].effect, Effect::Credit { amount, .. } if (amount - 18.0).abs() < 1e-9));

        f.backend.wallets.failures.set_offline(false);
        f.backend.ledger.failures.set_offline(false);
        let drained = f.service.effects().drain_outbox(10).await.unwrap();
        assert_eq!(drained.applied, 1);
        assert!((f.backend.wallets.peek("acc").unwrap().balance - 108.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_claim_write_leaves_wager_open() {
        let f = fixture();
        f.cache.on_price_update("BTCUSDT", 100.0, T0);
        let wager = f
            .service
            .open("acc", "BTCUSDT", 10.0, Interval::OneMinute, Direction::Up, false)
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(1));
        f.backend.outbox.failures.set_offline(true);

        let err = f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap_err();

        assert_eq!(err.reason(), "DOWNSTREAM_WRITE_FAILURE");
        assert!(f.backend.wagers.get(&wager.id).await.unwrap().unwrap().is_open());
        assert_eq!(f.backend.wallets.peek("acc").unwrap().balance, 90.0);

        f.backend.outbox.failures.set_offline(false);
        f.service.settle_at_maturity(&wager.id, 105.0).await.unwrap();
        assert!((f.backend.wallets.peek("acc").unwrap().balance - 108.0).abs() < 1e-9);
    }
}
