//! Outbound ports
//!
//! The engine only talks to storage and subscribers through these traits.
//! `memory` implements all of them for tests and single-process runs,
//! `database` implements the persistence ones on PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{
    AccountProfile, BalanceClass, CommissionLedgerEntry, DepositStatus, DepositTransaction,
    Notification, OutboxItem, Resolution, StakeFunding, StoreError, Wager, Wallet,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait WagerStore: Send + Sync {
    /// Insert a new wager
    async fn save(&self, wager: &Wager) -> StoreResult<()>;

    async fn get(&self, wager_id: &str) -> StoreResult<Option<Wager>>;

    /// Unfinished wagers with `matures_at <= now`
    async fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Wager>>;

    /// Compare-and-set from unfinished to terminal
    ///
    /// Returns the updated wager to exactly one caller; every other caller
    /// (and any caller after the fact) gets `None`. The winner's `effects`
    /// are enqueued in the same atomic write; losers enqueue nothing.
    async fn claim(
        &self,
        wager_id: &str,
        resolution: &Resolution,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<Wager>>;

    async fn open_for_account(&self, account_id: &str) -> StoreResult<Vec<Wager>>;
}

/// Atomic per-call balance mutations on the external account store
#[async_trait]
pub trait WalletMutator: Send + Sync {
    async fn wallet(&self, account_id: &str) -> StoreResult<Wallet>;

    async fn credit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet>;

    /// Fails with `InsufficientFunds` unless the class may go negative
    async fn debit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet>;

    /// Debit a stake (bonus, then deposit, then balance; or demo) in one step
    async fn fund_stake(&self, account_id: &str, stake: f64, is_demo: bool) -> StoreResult<StakeFunding>;

    /// Put a funded stake back where it came from
    async fn refund_stake(&self, account_id: &str, funding: &StakeFunding) -> StoreResult<Wallet>;

    /// Signed change recorded under `effect_key` in the same write
    ///
    /// `None` when the key was applied before; nothing changes then.
    async fn apply_keyed(
        &self,
        effect_key: &str,
        account_id: &str,
        class: BalanceClass,
        amount: f64,
    ) -> StoreResult<Option<Wallet>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append-only; appending an id twice is a no-op
    async fn append(&self, entry: &CommissionLedgerEntry) -> StoreResult<()>;

    async fn entries_for(&self, beneficiary_account_id: &str) -> StoreResult<Vec<CommissionLedgerEntry>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, items: &[OutboxItem]) -> StoreResult<()>;

    /// Live items of operations whose head item is due at `now`
    ///
    /// Oldest first, ordered within an operation by sequence. Operations
    /// backing off and dead-lettered items are skipped, so they never fill
    /// the batch.
    async fn pending(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>>;

    async fn complete(&self, item_id: &str) -> StoreResult<()>;

    /// Count a failed replay and hold the item until `next_attempt_at`
    async fn record_failure(&self, item_id: &str, error: &str, next_attempt_at: DateTime<Utc>) -> StoreResult<()>;

    /// Stop replaying an item that can never succeed
    async fn dead_letter(&self, item_id: &str, error: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ReferralDirectory: Send + Sync {
    async fn profile(&self, account_id: &str) -> StoreResult<Option<AccountProfile>>;
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    async fn get(&self, transaction_id: &str) -> StoreResult<Option<DepositTransaction>>;

    /// Compare-and-set on status; `None` when the deposit was not in `from`
    ///
    /// `effects` are enqueued in the same atomic write, only on success.
    async fn transition(
        &self,
        transaction_id: &str,
        from: DepositStatus,
        to: DepositStatus,
        now: DateTime<Utc>,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<DepositTransaction>>;

    async fn approved_count(&self, account_id: &str) -> StoreResult<u64>;
}

/// Fire-and-forget delivery to subscribers
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Every port the engine needs, bundled for wiring
#[derive(Clone)]
pub struct EnginePorts {
    pub wagers: Arc<dyn WagerStore>,
    pub wallets: Arc<dyn WalletMutator>,
    pub ledger: Arc<dyn LedgerStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub directory: Arc<dyn ReferralDirectory>,
    pub deposits: Arc<dyn DepositStore>,
    pub publisher: Arc<dyn NotificationPublisher>,
}
