//! Downstream effects of a settlement
//!
//! The money a settlement moves is described as an ordered list of
//! [`Effect`]s. They are written to the outbox as [`OutboxItem`]s in the same
//! store write that claims the wager, then applied and completed. Each item's
//! [`OutboxItem::key`] makes a replay of an applied effect a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::affiliate::CommissionLedgerEntry;
use super::wallet::BalanceClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Payout to a stake-funding or demo balance
    Credit {
        account_id: String,
        class: BalanceClass,
        amount: f64,
    },
    AppendLedger {
        entry: CommissionLedgerEntry,
    },
    /// Signed change of `affiliate_earnings`
    AdjustAffiliate {
        account_id: String,
        amount: f64,
    },
}

impl Effect {
    /// Account whose wallet this effect changes, if any
    pub fn touched_account(&self) -> Option<&str> {
        match self {
            Effect::Credit { account_id, .. } | Effect::AdjustAffiliate { account_id, .. } => {
                Some(account_id)
            }
            Effect::AppendLedger { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Effect::Credit { .. } => "credit",
            Effect::AppendLedger { .. } => "append_ledger",
            Effect::AdjustAffiliate { .. } => "adjust_affiliate",
        }
    }
}

/// A recorded effect, pending until applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    /// Wager or deposit that produced the effect
    pub operation_id: String,
    /// Position within the operation's effect list
    pub sequence: u32,
    pub effect: Effect,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replays so far
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl OutboxItem {
    /// Record `effects` for one operation, all due immediately
    pub fn batch(operation_id: &str, effects: &[Effect], enqueued_at: DateTime<Utc>) -> Vec<Self> {
        effects
            .iter()
            .enumerate()
            .map(|(sequence, effect)| Self {
                id: uuid::Uuid::new_v4().to_string(),
                operation_id: operation_id.to_string(),
                sequence: sequence as u32,
                effect: effect.clone(),
                enqueued_at,
                attempts: 0,
                next_attempt_at: enqueued_at,
                last_error: None,
            })
            .collect()
    }

    /// Idempotency key for wallet writes, stable across replays
    pub fn key(&self) -> String {
        format!("{}:{}", self.operation_id, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_keeps_order() {
        let effects = vec![
            Effect::Credit {
                account_id: "a".to_string(),
                class: BalanceClass::Balance,
                amount: 18.0,
            },
            Effect::AdjustAffiliate {
                account_id: "r".to_string(),
                amount: -10.0,
            },
        ];

        let now = Utc::now();
        let items = OutboxItem::batch("w-1", &effects, now);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key(), "w-1:0");
        assert_eq!(items[1].key(), "w-1:1");
        assert_eq!(items[1].effect, effects[1]);
        assert_eq!(items[1].effect.touched_account(), Some("r"));
        assert!(items.iter().all(|i| i.attempts == 0 && i.next_attempt_at == now));
    }
}
