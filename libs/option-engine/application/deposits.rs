//! Deposit approval
//!
//! Approving credits the depositor and pays the referrer: a fixed CPA on the
//! account's first approved deposit, a percentage on every later one. The
//! bonus is added to the existing bonus balance, not written over it. The
//! status transition records every effect in the outbox in the same write.

use std::sync::Arc;
use tracing::info;

use super::effects::EffectApplier;
use super::referral::ReferralCascade;
use super::wager_service::WagerService;
use crate::domain::errors::Result;
use crate::domain::{BalanceClass, DepositStatus, DepositTransaction, Effect, EngineError};
use crate::infrastructure::clock::SharedClock;
use crate::infrastructure::ports::DepositStore;

pub struct DepositService {
    deposits: Arc<dyn DepositStore>,
    cascade: ReferralCascade,
    effects: EffectApplier,
    clock: SharedClock,
    wagers: Arc<WagerService>,
}

impl DepositService {
    /// Shares stores, cascade and notifications with the wager service
    pub fn new(wagers: Arc<WagerService>) -> Self {
        Self {
            deposits: wagers.ports().deposits.clone(),
            cascade: wagers.cascade().clone(),
            effects: wagers.effects().clone(),
            clock: wagers.clock().clone(),
            wagers,
        }
    }

    pub async fn approve_deposit(&self, transaction_id: &str) -> Result<DepositTransaction> {
        let pending = self.load_pending(transaction_id).await?;

        // Decided and planned before the transition so a lookup failure changes nothing
        let first_deposit = self.deposits.approved_count(&pending.account_id).await? == 0;
        let commissions = self.cascade.plan_for_deposit(&pending, first_deposit).await?;

        let mut effects = commissions;
        effects.push(Effect::Credit {
            account_id: pending.account_id.clone(),
            class: BalanceClass::Balance,
            amount: pending.amount,
        });
        if pending.bonus > 0.0 {
            effects.push(Effect::Credit {
                account_id: pending.account_id.clone(),
                class: BalanceClass::Bonus,
                amount: pending.bonus,
            });
        }
        let items = self.effects.record(&pending.id, &effects);

        let approved = self
            .deposits
            .transition(
                transaction_id,
                DepositStatus::Pending,
                DepositStatus::Approved,
                self.clock.now(),
                &items,
            )
            .await?
            .ok_or_else(|| EngineError::DepositNotPending(transaction_id.to_string()))?;

        let report = self.effects.apply_all(&items).await;

        info!(
            transaction_id = %approved.id,
            account_id = %approved.account_id,
            amount = approved.amount,
            bonus = approved.bonus,
            first_deposit,
            deferred = report.deferred,
            "Deposit approved"
        );

        self.wagers.notify_accounts(&report.touched_accounts).await;
        Ok(approved)
    }

    /// Mark a pending deposit rejected; no money moves
    pub async fn reject_deposit(&self, transaction_id: &str) -> Result<DepositTransaction> {
        self.load_pending(transaction_id).await?;

        let rejected = self
            .deposits
            .transition(
                transaction_id,
                DepositStatus::Pending,
                DepositStatus::Rejected,
                self.clock.now(),
                &[],
            )
            .await?
            .ok_or_else(|| EngineError::DepositNotPending(transaction_id.to_string()))?;

        info!(transaction_id = %rejected.id, account_id = %rejected.account_id, "Deposit rejected");
        Ok(rejected)
    }

    async fn load_pending(&self, transaction_id: &str) -> Result<DepositTransaction> {
        let deposit = self
            .deposits
            .get(transaction_id)
            .await?
            .ok_or_else(|| EngineError::DepositNotFound(transaction_id.to_string()))?;

        if deposit.status != DepositStatus::Pending {
            return Err(EngineError::DepositNotPending(transaction_id.to_string()));
        }
        Ok(deposit)
    }
}
