//! Effect application and the settlement outbox
//!
//! A settlement's effects are already in the outbox when it gets here: the
//! claim wrote them. They are applied in order and completed one by one; the
//! first failure leaves the rest for the scheduler, which replays due items
//! every tick. Replays are no-ops for anything already applied: wallet writes
//! are keyed by [`OutboxItem::key`], ledger appends dedupe by entry id.
//! Transient failures back off exponentially, permanent ones are dead-lettered.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{BalanceClass, Effect, OutboxItem};
use crate::infrastructure::clock::SharedClock;
use crate::infrastructure::ports::{LedgerStore, OutboxStore, StoreResult, WalletMutator};

pub const RETRY_BASE_MS: i64 = 1_000;
pub const RETRY_MAX_MS: i64 = 60_000;

/// Delay before the next replay of an item that failed `attempts` times
pub fn retry_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    Duration::milliseconds((RETRY_BASE_MS << exponent).min(RETRY_MAX_MS))
}

/// Outcome of applying one operation's effects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Left in the outbox for the scheduler
    pub deferred: usize,
    /// Accounts whose balances actually changed
    pub touched_accounts: Vec<String>,
}

/// Outcome of one outbox pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub applied: usize,
    pub still_pending: usize,
    pub dead_lettered: usize,
    pub touched_accounts: Vec<String>,
}

#[derive(Clone)]
pub struct EffectApplier {
    wallets: Arc<dyn WalletMutator>,
    ledger: Arc<dyn LedgerStore>,
    outbox: Arc<dyn OutboxStore>,
    clock: SharedClock,
}

impl EffectApplier {
    pub fn new(
        wallets: Arc<dyn WalletMutator>,
        ledger: Arc<dyn LedgerStore>,
        outbox: Arc<dyn OutboxStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            wallets,
            ledger,
            outbox,
            clock,
        }
    }

    /// Outbox items for `effects`, stamped with the engine clock
    pub fn record(&self, operation_id: &str, effects: &[Effect]) -> Vec<OutboxItem> {
        OutboxItem::batch(operation_id, effects, self.clock.now())
    }

    /// Apply one item; a replay of an applied item changes nothing
    pub async fn apply_one(&self, item: &OutboxItem) -> StoreResult<()> {
        let key = item.key();
        let applied = match &item.effect {
            Effect::Credit {
                account_id,
                class,
                amount,
            } => self.wallets.apply_keyed(&key, account_id, *class, *amount).await?,
            Effect::AppendLedger { entry } => {
                self.ledger.append(entry).await?;
                return Ok(());
            }
            Effect::AdjustAffiliate { account_id, amount } => {
                self.wallets
                    .apply_keyed(&key, account_id, BalanceClass::Affiliate, *amount)
                    .await?
            }
        };

        if applied.is_none() {
            debug!(effect_key = %key, effect = item.effect.label(), "Effect already applied, skipping");
        }
        Ok(())
    }

    /// Apply an operation's recorded items in order, completing each
    ///
    /// Stops at the first failure; the failed item and the rest stay queued.
    pub async fn apply_all(&self, items: &[OutboxItem]) -> ApplyReport {
        let mut touched = BTreeSet::new();

        for (index, item) in items.iter().enumerate() {
            if let Err(e) = self.apply_one(item).await {
                warn!(
                    operation_id = %item.operation_id,
                    effect = item.effect.label(),
                    error = %e,
                    "Downstream write failed, remaining effects stay in the outbox"
                );
                return ApplyReport {
                    applied: index,
                    deferred: items.len() - index,
                    touched_accounts: touched.into_iter().collect(),
                };
            }

            if let Some(account) = item.effect.touched_account() {
                touched.insert(account.to_string());
            }
            self.mark_complete(item).await;
        }

        ApplyReport {
            applied: items.len(),
            deferred: 0,
            touched_accounts: touched.into_iter().collect(),
        }
    }

    /// Replay due items, oldest first
    ///
    /// A transiently failing item blocks the rest of its operation and backs
    /// off; a permanently failing one is dead-lettered and the operation moves on.
    pub async fn drain_outbox(&self, batch_size: usize) -> StoreResult<DrainReport> {
        let now = self.clock.now();
        let items = self.outbox.pending(batch_size, now).await?;
        if items.is_empty() {
            return Ok(DrainReport::default());
        }

        let started = Utc::now();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut touched = BTreeSet::new();
        let mut applied = 0;
        let mut dead_lettered = 0;

        for item in &items {
            if blocked.contains(&item.operation_id) {
                continue;
            }

            match self.apply_one(item).await {
                Ok(()) => {
                    if let Some(account) = item.effect.touched_account() {
                        touched.insert(account.to_string());
                    }
                    applied += 1;
                    self.mark_complete(item).await;
                }
                Err(e) if e.is_permanent() => {
                    error!(
                        item_id = %item.id,
                        operation_id = %item.operation_id,
                        effect = ?item.effect,
                        error = %e,
                        "Outbox item cannot succeed, moved to dead letters"
                    );
                    if let Err(dl_err) = self.outbox.dead_letter(&item.id, &e.to_string()).await {
                        warn!(item_id = %item.id, error = %dl_err, "Failed to dead-letter outbox item");
                        blocked.insert(item.operation_id.clone());
                    } else {
                        dead_lettered += 1;
                    }
                }
                Err(e) => {
                    let next_attempt_at = self.backoff(item, now);
                    debug!(
                        item_id = %item.id,
                        operation_id = %item.operation_id,
                        effect = item.effect.label(),
                        attempts = item.attempts + 1,
                        next_attempt_at = %next_attempt_at,
                        error = %e,
                        "Outbox item still failing"
                    );
                    if let Err(rec_err) = self.outbox.record_failure(&item.id, &e.to_string(), next_attempt_at).await {
                        warn!(item_id = %item.id, error = %rec_err, "Failed to record outbox retry");
                    }
                    blocked.insert(item.operation_id.clone());
                }
            }
        }

        let still_pending = items.len() - applied - dead_lettered;
        if applied > 0 || dead_lettered > 0 {
            info!(
                applied,
                dead_lettered,
                pending = still_pending,
                elapsed_ms = (Utc::now() - started).num_milliseconds(),
                "Outbox drained"
            );
        }

        Ok(DrainReport {
            applied,
            still_pending,
            dead_lettered,
            touched_accounts: touched.into_iter().collect(),
        })
    }

    fn backoff(&self, item: &OutboxItem, now: DateTime<Utc>) -> DateTime<Utc> {
        now + retry_delay(item.attempts + 1)
    }

    async fn mark_complete(&self, item: &OutboxItem) {
        if let Err(e) = self.outbox.complete(&item.id).await {
            // Stays queued; the replay is a no-op
            warn!(item_id = %item.id, effect_key = %item.key(), error = %e, "Failed to mark outbox item complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommissionKind, CommissionLedgerEntry, StoreError};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::memory::{InMemoryBackend, InMemoryOutbox};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn applier(backend: &InMemoryBackend, clock: Arc<ManualClock>) -> EffectApplier {
        EffectApplier::new(backend.wallets.clone(), backend.ledger.clone(), backend.outbox.clone(), clock)
    }

    fn effects() -> Vec<Effect> {
        let entry = CommissionLedgerEntry::new("ref", "user", "w-1", CommissionKind::RevShareLoss, 10.0, 2.0, Utc::now());
        vec![
            Effect::Credit {
                account_id: "user".to_string(),
                class: BalanceClass::Balance,
                amount: 5.0,
            },
            Effect::AppendLedger { entry },
            Effect::AdjustAffiliate {
                account_id: "ref".to_string(),
                amount: 2.0,
            },
        ]
    }

    /// Enqueue as a claim would, returning the recorded items
    async fn recorded(applier: &EffectApplier, backend: &InMemoryBackend, operation_id: &str, effects: &[Effect]) -> Vec<OutboxItem> {
        let items = applier.record(operation_id, effects);
        backend.outbox.enqueue(&items).await.unwrap();
        items
    }

    fn credit(account_id: &str, amount: f64) -> Effect {
        Effect::Credit {
            account_id: account_id.to_string(),
            class: BalanceClass::Balance,
            amount,
        }
    }

    #[test]
    fn test_retry_delay_doubles_up_to_cap() {
        assert_eq!(retry_delay(1), Duration::seconds(1));
        assert_eq!(retry_delay(2), Duration::seconds(2));
        assert_eq!(retry_delay(4), Duration::seconds(8));
        assert_eq!(retry_delay(40), Duration::milliseconds(RETRY_MAX_MS));
    }

    #[tokio::test]
    async fn test_all_effects_apply_in_order() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("user");
        backend.wallets.open_account("ref");
        let applier = applier(&backend, Arc::new(ManualClock::at_millis(0)));
        let items = recorded(&applier, &backend, "w-1", &effects()).await;

        let report = applier.apply_all(&items).await;

        assert_eq!(report.applied, 3);
        assert_eq!(report.deferred, 0);
        assert_eq!(report.touched_accounts, vec!["ref", "user"]);
        assert!(backend.outbox.is_empty());
        assert_eq!(backend.ledger.all().len(), 1);
        assert_eq!(backend.wallets.peek("ref").unwrap().affiliate_earnings, 2.0);
    }

    #[tokio::test]
    async fn test_failure_leaves_tail_and_drain_replays_it() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("user");
        backend.wallets.open_account("ref");
        backend.ledger.failures.set_offline(true);
        let clock = Arc::new(ManualClock::at_millis(0));
        let applier = applier(&backend, clock.clone());
        let items = recorded(&applier, &backend, "w-1", &effects()).await;

        let report = applier.apply_all(&items).await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(backend.outbox.len(), 2);
        assert_eq!(backend.wallets.peek("ref").unwrap().affiliate_earnings, 0.0);

        // Still down: nothing moves, the operation backs off
        let drained = applier.drain_outbox(100).await.unwrap();
        assert_eq!(drained.applied, 0);
        assert_eq!(backend.outbox.items()[0].attempts, 1);
        assert_eq!(backend.wallets.peek("ref").unwrap().affiliate_earnings, 0.0);

        backend.ledger.failures.set_offline(false);
        assert_eq!(applier.drain_outbox(100).await.unwrap().applied, 0);

        clock.advance(retry_delay(1));
        let drained = applier.drain_outbox(100).await.unwrap();
        assert_eq!(drained.applied, 2);
        assert!(backend.outbox.is_empty());
        assert_eq!(backend.ledger.all().len(), 1);
        assert_eq!(backend.wallets.peek("ref").unwrap().affiliate_earnings, 2.0);
        assert_eq!(backend.wallets.peek("user").unwrap().balance, 5.0);
    }

    /// Outbox whose `complete` fails once
    #[derive(Default)]
    struct FlakyComplete {
        inner: InMemoryOutbox,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl OutboxStore for FlakyComplete {
        async fn enqueue(&self, items: &[OutboxItem]) -> StoreResult<()> {
            self.inner.enqueue(items).await
        }

        async fn pending(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>> {
            self.inner.pending(limit, now).await
        }

        async fn complete(&self, item_id: &str) -> StoreResult<()> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("complete (injected)".to_string()));
            }
            self.inner.complete(item_id).await
        }

        async fn record_failure(&self, item_id: &str, error: &str, next_attempt_at: DateTime<Utc>) -> StoreResult<()> {
            self.inner.record_failure(item_id, error, next_attempt_at).await
        }

        async fn dead_letter(&self, item_id: &str, error: &str) -> StoreResult<()> {
            self.inner.dead_letter(item_id, error).await
        }
    }

    #[tokio::test]
    async fn test_payout_replayed_after_failed_complete_is_credited_once() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("winner");
        let outbox = Arc::new(FlakyComplete::default());
        let applier = EffectApplier::new(
            backend.wallets.clone(),
            backend.ledger.clone(),
            outbox.clone(),
            Arc::new(ManualClock::at_millis(0)),
        );
        let items = applier.record("w-1", &[credit("winner", 18.0)]);
        outbox.enqueue(&items).await.unwrap();

        let first = applier.drain_outbox(10).await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(outbox.inner.len(), 1);

        applier.drain_outbox(10).await.unwrap();

        assert!(outbox.inner.is_empty());
        assert_eq!(backend.wallets.peek("winner").unwrap().balance, 18.0);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_dead_lettered_and_do_not_starve_the_queue() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("good");
        let applier = applier(&backend, Arc::new(ManualClock::at_millis(0)));
        for n in 0..3 {
            recorded(&applier, &backend, &format!("w-ghost-{}", n), &[credit("ghost", 1.0)]).await;
        }
        recorded(&applier, &backend, "w-good", &[credit("good", 18.0)]).await;

        let first = applier.drain_outbox(3).await.unwrap();
        assert_eq!(first.dead_lettered, 3);
        let second = applier.drain_outbox(3).await.unwrap();
        assert_eq!(second.applied, 1);

        assert_eq!(backend.wallets.peek("good").unwrap().balance, 18.0);
        assert!(backend.outbox.is_empty());
        assert_eq!(backend.outbox.dead_letters().len(), 3);
    }

    #[tokio::test]
    async fn test_backed_off_items_do_not_fill_the_batch() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("good");
        backend.wallets.open_account("busy");
        let applier = applier(&backend, Arc::new(ManualClock::at_millis(0)));
        for n in 0..3 {
            recorded(&applier, &backend, &format!("w-busy-{}", n), &[credit("busy", 1.0)]).await;
        }
        recorded(&applier, &backend, "w-good", &[credit("good", 18.0)]).await;

        backend.wallets.failures.fail_next(3);
        assert_eq!(applier.drain_outbox(3).await.unwrap().applied, 0);
        assert_eq!(applier.drain_outbox(3).await.unwrap().applied, 1);

        assert_eq!(backend.wallets.peek("good").unwrap().balance, 18.0);
        assert_eq!(backend.outbox.len(), 3);
    }

    #[tokio::test]
    async fn test_negative_adjustment_debits_affiliate_below_zero() {
        let backend = InMemoryBackend::new();
        backend.wallets.open_account("ref");
        let applier = applier(&backend, Arc::new(ManualClock::at_millis(0)));
        let items = applier.record(
            "w-1",
            &[Effect::AdjustAffiliate {
                account_id: "ref".to_string(),
                amount: -10.0,
            }],
        );

        applier.apply_one(&items[0]).await.unwrap();
        applier.apply_one(&items[0]).await.unwrap();

        assert_eq!(backend.wallets.peek("ref").unwrap().affiliate_earnings, -10.0);
    }
}
