pub mod models;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use tracing::{debug, info};

pub use models::{DbAccountProfile, DbDeposit, DbLedgerEntry, DbOutboxItem, DbWager, DbWallet};
pub use schema::{get_schema_version, initialize_schema, SchemaError};

use std::sync::Arc;

use super::ports::{
    DepositStore, EnginePorts, LedgerStore, NotificationPublisher, OutboxStore, ReferralDirectory,
    StoreResult, WagerStore, WalletMutator,
};
use crate::domain::{
    AccountProfile, BalanceClass, CommissionLedgerEntry, DepositStatus, DepositTransaction,
    OutboxItem, Resolution, StakeFunding, StoreError, Wager, Wallet,
};

const WALLET_COLUMNS: &str = "demo, deposit, balance, bonus, affiliate_earnings";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::unavailable(err),
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(err: SchemaError) -> Self {
        StoreError::unavailable(err)
    }
}

/// PostgreSQL-backed persistence ports
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create new database connection and initialize schema
    pub async fn connect(db_url: &str, max_connections: u32) -> StoreResult<Self> {
        info!("Connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        schema::initialize_schema(&pool).await?;

        info!("Database initialized successfully");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every persistence port backed by this pool
    pub fn ports(&self, publisher: Arc<dyn NotificationPublisher>) -> EnginePorts {
        let store = Arc::new(self.clone());
        EnginePorts {
            wagers: store.clone(),
            wallets: store.clone(),
            ledger: store.clone(),
            outbox: store.clone(),
            directory: store.clone(),
            deposits: store,
            publisher,
        }
    }

    async fn read_wallet(&self, account_id: &str) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, DbWallet>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Wallet::from))
    }

    /// Outbox rows written inside a claim or a deposit transition
    async fn insert_outbox_items(conn: &mut PgConnection, items: &[OutboxItem]) -> StoreResult<()> {
        for item in items {
            let effect = serde_json::to_string(&item.effect)
                .map_err(|e| StoreError::Corrupt(format!("outbox effect {}: {}", item.id, e)))?;

            sqlx::query(
                r#"
                INSERT INTO settlement_outbox (
                    id, operation_id, sequence, effect, enqueued_at, attempts, next_attempt_at, last_error
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&item.id)
            .bind(&item.operation_id)
            .bind(item.sequence as i32)
            .bind(effect)
            .bind(item.enqueued_at)
            .bind(item.attempts as i32)
            .bind(item.next_attempt_at)
            .bind(&item.last_error)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Tell a missing account apart from a failed balance guard
    async fn guard_failure(&self, account_id: &str, class: BalanceClass, required: f64) -> StoreError {
        match self.read_wallet(account_id).await {
            Ok(Some(wallet)) => StoreError::InsufficientFunds {
                required,
                available: wallet.get(class),
            },
            Ok(None) => StoreError::AccountNotFound(account_id.to_string()),
            Err(e) => e,
        }
    }
}

// ==================== WAGERS ====================

#[async_trait]
impl WagerStore for PgStore {
    async fn save(&self, wager: &Wager) -> StoreResult<()> {
        debug!(wager_id = %wager.id, account_id = %wager.account_id, "Inserting wager");
        sqlx::query(
            r#"
            INSERT INTO wagers (
                id, account_id, instrument, interval, direction, stake, entry_price, exit_price,
                status, settlement_amount, created_at, matures_at, is_demo, finished, settled_via, settled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&wager.id)
        .bind(&wager.account_id)
        .bind(&wager.instrument)
        .bind(wager.interval.as_str())
        .bind(wager.direction.as_str())
        .bind(wager.stake)
        .bind(wager.entry_price)
        .bind(wager.exit_price)
        .bind(wager.status.as_str())
        .bind(wager.settlement_amount)
        .bind(wager.created_at)
        .bind(wager.matures_at)
        .bind(wager.is_demo)
        .bind(wager.finished)
        .bind(wager.settled_via.map(|v| v.as_str()))
        .bind(wager.settled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, wager_id: &str) -> StoreResult<Option<Wager>> {
        sqlx::query_as::<_, DbWager>("SELECT * FROM wagers WHERE id = $1")
            .bind(wager_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Wager::try_from)
            .transpose()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Wager>> {
        sqlx::query_as::<_, DbWager>(
            "SELECT * FROM wagers WHERE finished = false AND matures_at <= $1 ORDER BY matures_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Wager::try_from)
        .collect()
    }

    async fn claim(
        &self,
        wager_id: &str,
        resolution: &Resolution,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<Wager>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DbWager>(
            r#"
            UPDATE wagers SET
                status = $2,
                exit_price = $3,
                settlement_amount = $4,
                settled_via = $5,
                settled_at = $6,
                finished = true
            WHERE id = $1 AND finished = false
            RETURNING *
            "#,
        )
        .bind(wager_id)
        .bind(resolution.status.as_str())
        .bind(resolution.exit_price)
        .bind(resolution.settlement_amount)
        .bind(resolution.via.as_str())
        .bind(resolution.settled_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::insert_outbox_items(&mut *tx, effects).await?;
        tx.commit().await?;

        Wager::try_from(row).map(Some)
    }

    async fn open_for_account(&self, account_id: &str) -> StoreResult<Vec<Wager>> {
        sqlx::query_as::<_, DbWager>(
            "SELECT * FROM wagers WHERE account_id = $1 AND finished = false ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Wager::try_from)
        .collect()
    }
}

// ==================== WALLETS ====================

#[async_trait]
impl WalletMutator for PgStore {
    async fn wallet(&self, account_id: &str) -> StoreResult<Wallet> {
        self.read_wallet(account_id)
            .await?
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))
    }

    async fn credit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet> {
        let column = class.column();
        let row = sqlx::query_as::<_, DbWallet>(&format!(
            "UPDATE accounts SET {col} = {col} + $2 WHERE id = $1 RETURNING {cols}",
            col = column,
            cols = WALLET_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Wallet::from)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))
    }

    async fn debit(&self, account_id: &str, class: BalanceClass, amount: f64) -> StoreResult<Wallet> {
        let column = class.column();
        let guard = if class.allows_negative() {
            String::new()
        } else {
            format!(" AND {} >= $2", column)
        };

        let row = sqlx::query_as::<_, DbWallet>(&format!(
            "UPDATE accounts SET {col} = {col} - $2 WHERE id = $1{guard} RETURNING {cols}",
            col = column,
            guard = guard,
            cols = WALLET_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.guard_failure(account_id, class, amount).await),
        }
    }

    async fn fund_stake(&self, account_id: &str, stake: f64, is_demo: bool) -> StoreResult<StakeFunding> {
        if is_demo {
            let row = sqlx::query_as::<_, (f64,)>(
                "UPDATE accounts SET demo = demo - $2 WHERE id = $1 AND demo >= $2 RETURNING demo",
            )
            .bind(account_id)
            .bind(stake)
            .fetch_optional(&self.pool)
            .await?;

            return match row {
                Some(_) => Ok(StakeFunding {
                    demo: stake,
                    ..StakeFunding::default()
                }),
                None => Err(self.guard_failure(account_id, BalanceClass::Demo, stake).await),
            };
        }

        // Split bonus -> deposit -> balance against the locked pre-update row
        let row = sqlx::query_as::<_, (f64, f64)>(
            r#"
            WITH old AS (
                SELECT id, bonus, deposit FROM accounts WHERE id = $1 FOR UPDATE
            ), split AS (
                SELECT id,
                       LEAST($2, GREATEST(bonus, 0)) AS from_bonus,
                       LEAST($2 - LEAST($2, GREATEST(bonus, 0)), GREATEST(deposit, 0)) AS from_deposit
                FROM old
            )
            UPDATE accounts a SET
                bonus = a.bonus - split.from_bonus,
                deposit = a.deposit - split.from_deposit,
                balance = a.balance - ($2 - split.from_bonus - split.from_deposit)
            FROM split
            WHERE a.id = split.id AND a.bonus + a.deposit + a.balance >= $2
            RETURNING split.from_bonus, split.from_deposit
            "#,
        )
        .bind(account_id)
        .bind(stake)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((from_bonus, from_deposit)) => Ok(StakeFunding {
                demo: 0.0,
                bonus: from_bonus,
                deposit: from_deposit,
                balance: stake - from_bonus - from_deposit,
            }),
            None => match self.read_wallet(account_id).await? {
                Some(wallet) => Err(StoreError::InsufficientFunds {
                    required: stake,
                    available: wallet.stakeable(false),
                }),
                None => Err(StoreError::AccountNotFound(account_id.to_string())),
            },
        }
    }

    async fn refund_stake(&self, account_id: &str, funding: &StakeFunding) -> StoreResult<Wallet> {
        let row = sqlx::query_as::<_, DbWallet>(&format!(
            r#"
            UPDATE accounts SET
                demo = demo + $2,
                bonus = bonus + $3,
                deposit = deposit + $4,
                balance = balance + $5
            WHERE id = $1
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(account_id)
        .bind(funding.demo)
        .bind(funding.bonus)
        .bind(funding.deposit)
        .bind(funding.balance)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Wallet::from)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))
    }

    async fn apply_keyed(
        &self,
        effect_key: &str,
        account_id: &str,
        class: BalanceClass,
        amount: f64,
    ) -> StoreResult<Option<Wallet>> {
        let column = class.column();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO applied_effects (effect_key, account_id, balance_class, amount, applied_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (effect_key) DO NOTHING
            "#,
        )
        .bind(effect_key)
        .bind(account_id)
        .bind(column)
        .bind(amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(effect_key, account_id, "Wallet effect already applied");
            return Ok(None);
        }

        let guard = if amount < 0.0 && !class.allows_negative() {
            format!(" AND {} + $2 >= 0", column)
        } else {
            String::new()
        };

        let row = sqlx::query_as::<_, DbWallet>(&format!(
            "UPDATE accounts SET {col} = {col} + $2 WHERE id = $1{guard} RETURNING {cols}",
            col = column,
            guard = guard,
            cols = WALLET_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => {
                tx.commit().await?;
                Ok(Some(row.into()))
            }
            None => {
                tx.rollback().await?;
                Err(self.guard_failure(account_id, class, -amount).await)
            }
        }
    }
}

// ==================== LEDGER ====================

#[async_trait]
impl LedgerStore for PgStore {
    async fn append(&self, entry: &CommissionLedgerEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO commission_ledger (
                id, beneficiary_account_id, source_account_id, operation_id, kind,
                base_amount, paid_amount, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.beneficiary_account_id)
        .bind(&entry.source_account_id)
        .bind(&entry.operation_id)
        .bind(entry.kind.as_str())
        .bind(entry.base_amount)
        .bind(entry.paid_amount)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries_for(&self, beneficiary_account_id: &str) -> StoreResult<Vec<CommissionLedgerEntry>> {
        sqlx::query_as::<_, DbLedgerEntry>(
            "SELECT * FROM commission_ledger WHERE beneficiary_account_id = $1 ORDER BY created_at",
        )
        .bind(beneficiary_account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CommissionLedgerEntry::try_from)
        .collect()
    }
}

// ==================== OUTBOX ====================

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue(&self, items: &[OutboxItem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_outbox_items(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn pending(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>> {
        // Only operations whose lowest live sequence is due
        sqlx::query_as::<_, DbOutboxItem>(
            r#"
            SELECT o.id, o.operation_id, o.sequence, o.effect, o.enqueued_at,
                   o.attempts, o.next_attempt_at, o.last_error
            FROM settlement_outbox o
            JOIN (
                SELECT DISTINCT ON (operation_id) operation_id, next_attempt_at
                FROM settlement_outbox
                WHERE dead_at IS NULL
                ORDER BY operation_id, sequence
            ) head ON head.operation_id = o.operation_id
            WHERE o.dead_at IS NULL AND head.next_attempt_at <= $1
            ORDER BY o.position
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OutboxItem::try_from)
        .collect()
    }

    async fn complete(&self, item_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM settlement_outbox WHERE id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failure(&self, item_id: &str, error: &str, next_attempt_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE settlement_outbox
            SET attempts = attempts + 1, next_attempt_at = $2, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, item_id: &str, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE settlement_outbox
            SET attempts = attempts + 1, last_error = $2, dead_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== REFERRALS ====================

#[async_trait]
impl ReferralDirectory for PgStore {
    async fn profile(&self, account_id: &str) -> StoreResult<Option<AccountProfile>> {
        let row = sqlx::query_as::<_, DbAccountProfile>(
            r#"
            SELECT id, display_name, referred_by, is_affiliate, cpa, revenue_share_percent, percent_per_deposit
            FROM accounts WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AccountProfile::from))
    }
}

// ==================== DEPOSITS ====================

#[async_trait]
impl DepositStore for PgStore {
    async fn get(&self, transaction_id: &str) -> StoreResult<Option<DepositTransaction>> {
        sqlx::query_as::<_, DbDeposit>("SELECT * FROM deposit_transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .map(DepositTransaction::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        transaction_id: &str,
        from: DepositStatus,
        to: DepositStatus,
        now: DateTime<Utc>,
        effects: &[OutboxItem],
    ) -> StoreResult<Option<DepositTransaction>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DbDeposit>(
            r#"
            UPDATE deposit_transactions SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::insert_outbox_items(&mut *tx, effects).await?;
        tx.commit().await?;

        DepositTransaction::try_from(row).map(Some)
    }

    async fn approved_count(&self, account_id: &str) -> StoreResult<u64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM deposit_transactions WHERE account_id = $1 AND status = $2",
        )
        .bind(account_id)
        .bind(DepositStatus::Approved.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}
