//! In-memory stores
//!
//! Single-process implementations of every port. Used by the binary in
//! `memory` storage mode and by the tests, which can knock a store offline
//! through its [`FailureSwitch`]. Wager claims and deposit transitions share
//! the backend's outbox so their effects land in the same locked step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::ports::{
    DepositStore, EnginePorts, LedgerStore, NotificationPublisher, OutboxStore, ReferralDirectory,
    StoreResult, WagerStore, WalletMutator,
};
use crate::domain::{
    AccountProfile, BalanceClass, CommissionLedgerEntry, DepositStatus, DepositTransaction,
    Notification, OutboxItem, Resolution, StakeFunding, StoreError, Wager, Wallet,
};

// =============================================================================
// FailureSwitch
// =============================================================================

/// Makes a store report `Unavailable`
#[derive(Debug, Default)]
pub struct FailureSwitch {
    offline: AtomicBool,
    fail_next: AtomicU32,
}

impl FailureSwitch {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `calls` operations, then recover
    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} (offline)", operation)));
        }
        let tripped = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Unavailable(format!("{} (injected)", operation)));
        }
        Ok(())
    }
}

// =============================================================================
// Wagers
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryWagerStore {
    wagers: RwLock<HashMap<String, Wager>>,
    outbox: Arc<InMemoryOutbox>,
    pub failures: FailureSwitch,
}

impl InMemoryWagerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims enqueue their effects into `outbox`
    pub fn with_outbox(outbox: Arc<InMemoryOutbox>) -> Self {
        Self {
            outbox,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.wagers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.read().is_empty()
    }
}

#[async_trait]
impl WagerStore for InMemoryWagerStore {
    async fn save(&self, wager: &Wager) -> StoreResult<()> {
        self.failures.check("save wager")?;
        let mut wagers = self.wagers.write();
        if wagers.contains_key(&wager.id) {
            return Err(StoreError::Duplicate(wager.id.clone()));
        }
        wagers.insert(wager.id.clone(), wager.clone());
        Ok(())
    }

    async fn get(&self, wager_id: &str) -> StoreResult<Option<Wager>> {
        self.failures.check("get wager")?;
        Ok(self.wagers.read().get(wager_id).cloned())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Wager>> {
        self.failures.check("find due wagers")?;
        let mut due: Vec<Wager> = self
            .wagers
            .read()
            .values()
            .filter(|w| w.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|w| w.matures_at);
        Ok(due)
    }

    async fn claim(
        &self,
        wager_id: &str,
        resolution: &Resolution,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<Wager>> {
        self.failures.check("claim wager")?;
        let mut wagers = self.wagers.write();
        match wagers.get_mut(wager_id) {
            Some(wager) if !wager.finished => {
                self.outbox.append(effects)?;
                wager.apply(resolution);
                Ok(Some(wager.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn open_for_account(&self, account_id: &str) -> StoreResult<Vec<Wager>> {
        self.failures.check("open wagers")?;
        let mut open: Vec<Wager> = self
            .wagers
            .read()
            .values()
            .filter(|w| w.account_id == account_id && w.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|w| w.created_at);
        Ok(open)
    }
}

// =============================================================================
// Wallets
// =============================================================================

#[derive(Debug, Default)]
struct WalletBook {
    accounts: HashMap<String, Wallet>,
    /// Effect keys already applied
    applied: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryWallets {
    book: Mutex<WalletBook>,
    pub failures: FailureSwitch,
}

impl InMemoryWallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with the default wallet
    pub fn open_account(&self, account_id: &str) {
        self.book
            .lock()
            .accounts
            .entry(account_id.to_string())
            .or_default();
    }

    pub fn seed(&self, account_id: &str, wallet: Wallet) {
        self.book.lock().accounts.insert(account_id.to_string(), wallet);
    }

    /// Read without going through the failure switch
    pub fn peek(&self, account_id: &str) -> Option<Wallet> {
        self.book.lock().accounts.get(account_id).cloned()
    }

    fn with_wallet<T>(
        &self,
        account_id: &str,
        f: impl FnOnce(&mut Wallet) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut book = self.book.lock();
        let wallet = book
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))?;
        f(wallet)
    }
}

#[async_trait]
impl WalletMutator for InMemoryWallets {
    async fn wallet(&self, account_id: &str) -> StoreResult<Wallet> {
        self.failures.check("read wallet")?;
        self.with_wallet(account_id, |wallet| Ok(wallet.clone()))
    }

    async fn credit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet> {
        self.failures.check("credit wallet")?;
        self.with_wallet(account_id, |wallet| {
            wallet.credit(class, amount);
            Ok(wallet.clone())
        })
    }

    async fn debit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet> {
        self.failures.check("debit wallet")?;
        self.with_wallet(account_id, |wallet| {
            wallet.debit(class, amount)?;
            Ok(wallet.clone())
        })
    }

    async fn fund_stake(&self, account_id: &str, stake: f64, is_demo: bool) -> StoreResult<StakeFunding> {
        self.failures.check("fund stake")?;
        self.with_wallet(account_id, |wallet| wallet.fund_stake(stake, is_demo))
    }

    async fn refund_stake(&self, account_id: &str, funding: &StakeFunding) -> StoreResult<Wallet> {
        self.failures.check("refund stake")?;
        self.with_wallet(account_id, |wallet| {
            wallet.refund_stake(funding);
            Ok(wallet.clone())
        })
    }

    async fn apply_keyed(
        &self,
        effect_key: &str,
        account_id: &str,
        class: BalanceClass,
        amount: f64,
    ) -> StoreResult<Option<Wallet>> {
        self.failures.check("apply wallet effect")?;
        let mut book = self.book.lock();
        if book.applied.contains(effect_key) {
            return Ok(None);
        }

        let wallet = book
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))?;
        if amount >= 0.0 {
            wallet.credit(class, amount);
        } else {
            wallet.debit(class, -amount)?;
        }
        let wallet = wallet.clone();

        book.applied.insert(effect_key.to_string());
        Ok(Some(wallet))
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<CommissionLedgerEntry>>,
    pub failures: FailureSwitch,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<CommissionLedgerEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn append(&self, entry: &CommissionLedgerEntry) -> StoreResult<()> {
        self.failures.check("append ledger entry")?;
        let mut entries = self.entries.write();
        if !entries.iter().any(|e| e.id == entry.id) {
            entries.push(entry.clone());
        }
        Ok(())
    }

    async fn entries_for(&self, beneficiary_account_id: &str) -> StoreResult<Vec<CommissionLedgerEntry>> {
        self.failures.check("read ledger")?;
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.beneficiary_account_id == beneficiary_account_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Outbox
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    items: Mutex<Vec<OutboxItem>>,
    dead: Mutex<Vec<OutboxItem>>,
    pub failures: FailureSwitch,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live items, dead letters excluded
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn items(&self) -> Vec<OutboxItem> {
        self.items.lock().clone()
    }

    pub fn dead_letters(&self) -> Vec<OutboxItem> {
        self.dead.lock().clone()
    }

    /// Synchronous enqueue for stores that write effects under their own lock
    fn append(&self, items: &[OutboxItem]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.failures.check("enqueue outbox")?;
        self.items.lock().extend_from_slice(items);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn enqueue(&self, items: &[OutboxItem]) -> StoreResult<()> {
        self.append(items)
    }

    async fn pending(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>> {
        self.failures.check("read outbox")?;
        let items = self.items.lock();

        // Items are kept in enqueue order, so the first one seen per operation is its head
        let mut head_due: HashMap<&str, bool> = HashMap::new();
        for item in items.iter() {
            head_due
                .entry(item.operation_id.as_str())
                .or_insert(item.next_attempt_at <= now);
        }

        Ok(items
            .iter()
            .filter(|item| head_due.get(item.operation_id.as_str()).copied().unwrap_or(false))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn complete(&self, item_id: &str) -> StoreResult<()> {
        self.failures.check("complete outbox item")?;
        self.items.lock().retain(|item| item.id != item_id);
        Ok(())
    }

    async fn record_failure(&self, item_id: &str, error: &str, next_attempt_at: DateTime<Utc>) -> StoreResult<()> {
        self.failures.check("record outbox failure")?;
        if let Some(item) = self.items.lock().iter_mut().find(|item| item.id == item_id) {
            item.attempts += 1;
            item.next_attempt_at = next_attempt_at;
            item.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn dead_letter(&self, item_id: &str, error: &str) -> StoreResult<()> {
        self.failures.check("dead-letter outbox item")?;
        let mut items = self.items.lock();
        if let Some(index) = items.iter().position(|item| item.id == item_id) {
            let mut item = items.remove(index);
            item.attempts += 1;
            item.last_error = Some(error.to_string());
            self.dead.lock().push(item);
        }
        Ok(())
    }
}

// =============================================================================
// Referral directory
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<String, AccountProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: AccountProfile) {
        self.profiles
            .write()
            .insert(profile.account_id.clone(), profile);
    }
}

#[async_trait]
impl ReferralDirectory for InMemoryDirectory {
    async fn profile(&self, account_id: &str) -> StoreResult<Option<AccountProfile>> {
        Ok(self.profiles.read().get(account_id).cloned())
    }
}

// =============================================================================
// Deposits
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryDeposits {
    deposits: Mutex<HashMap<String, DepositTransaction>>,
    outbox: Arc<InMemoryOutbox>,
}

impl InMemoryDeposits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions enqueue their effects into `outbox`
    pub fn with_outbox(outbox: Arc<InMemoryOutbox>) -> Self {
        Self {
            outbox,
            ..Self::default()
        }
    }

    pub fn insert(&self, deposit: DepositTransaction) {
        self.deposits.lock().insert(deposit.id.clone(), deposit);
    }
}

#[async_trait]
impl DepositStore for InMemoryDeposits {
    async fn get(&self, transaction_id: &str) -> StoreResult<Option<DepositTransaction>> {
        Ok(self.deposits.lock().get(transaction_id).cloned())
    }

    async fn transition(
        &self,
        transaction_id: &str,
        from: DepositStatus,
        to: DepositStatus,
        now: DateTime<Utc>,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<DepositTransaction>> {
        let mut deposits = self.deposits.lock();
        match deposits.get_mut(transaction_id) {
            Some(deposit) if deposit.status == from => {
                self.outbox.append(effects)?;
                deposit.status = to;
                deposit.updated_at = now;
                Ok(Some(deposit.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn approved_count(&self, account_id: &str) -> StoreResult<u64> {
        Ok(self
            .deposits
            .lock()
            .values()
            .filter(|d| d.account_id == account_id && d.status == DepositStatus::Approved)
            .count() as u64)
    }
}

// =============================================================================
// RecordingPublisher
// =============================================================================

/// Keeps every notification for inspection
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Notification>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Notification> {
        self.published.lock().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published.lock().iter().map(|n| n.topic.clone()).collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl NotificationPublisher for RecordingPublisher {
    fn publish(&self, notification: Notification) {
        self.published.lock().push(notification);
    }
}

// =============================================================================
// InMemoryBackend
// =============================================================================

/// Concrete handles to every in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    pub wagers: Arc<InMemoryWagerStore>,
    pub wallets: Arc<InMemoryWallets>,
    pub ledger: Arc<InMemoryLedger>,
    pub outbox: Arc<InMemoryOutbox>,
    pub directory: Arc<InMemoryDirectory>,
    pub deposits: Arc<InMemoryDeposits>,
    pub publisher: Arc<RecordingPublisher>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let outbox = Arc::new(InMemoryOutbox::new());
        Self {
            wagers: Arc::new(InMemoryWagerStore::with_outbox(outbox.clone())),
            wallets: Arc::new(InMemoryWallets::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            deposits: Arc::new(InMemoryDeposits::with_outbox(outbox.clone())),
            outbox,
            directory: Arc::new(InMemoryDirectory::new()),
            publisher: Arc::new(RecordingPublisher::new()),
        }
    }

    pub fn ports(&self) -> EnginePorts {
        self.ports_with_publisher(self.publisher.clone())
    }

    /// Same stores, different subscriber transport
    pub fn ports_with_publisher(&self, publisher: Arc<dyn NotificationPublisher>) -> EnginePorts {
        EnginePorts {
            wagers: self.wagers.clone(),
            wallets: self.wallets.clone(),
            ledger: self.ledger.clone(),
            outbox: self.outbox.clone(),
            directory: self.directory.clone(),
            deposits: self.deposits.clone(),
            publisher,
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
