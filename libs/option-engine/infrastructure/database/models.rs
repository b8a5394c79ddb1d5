//! Row types
//!
//! Enums are stored as their upper-case names; anything that fails to parse
//! back surfaces as `StoreError::Corrupt` rather than a silent default.

use chrono::{DateTime, Utc};

use crate::domain::{
    AccountProfile, AffiliateTerms, CommissionKind, CommissionLedgerEntry, DepositStatus,
    DepositTransaction, Direction, Interval, OutboxItem, SettledVia, StoreError, Wager,
    WagerStatus, Wallet,
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbWager {
    pub id: String,
    pub account_id: String,
    pub instrument: String,
    pub interval: String,
    pub direction: String,
    pub stake: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub status: String,
    pub settlement_amount: f64,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub is_demo: bool,
    pub finished: bool,
    pub settled_via: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbWager> for Wager {
    type Error = StoreError;

    fn try_from(row: DbWager) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, value: &str| {
            StoreError::Corrupt(format!("wager {} has invalid {}: {}", row.id, field, value))
        };

        let interval: Interval = row
            .interval
            .parse()
            .map_err(|_| corrupt("interval", &row.interval))?;
        let direction: Direction = row
            .direction
            .parse()
            .map_err(|_| corrupt("direction", &row.direction))?;
        let status = WagerStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let settled_via = match &row.settled_via {
            Some(via) => Some(SettledVia::parse(via).ok_or_else(|| corrupt("settled_via", via))?),
            None => None,
        };

        Ok(Wager {
            id: row.id,
            account_id: row.account_id,
            instrument: row.instrument,
            interval,
            direction,
            stake: row.stake,
            entry_price: row.entry_price,
            exit_price: row.exit_price,
            status,
            settlement_amount: row.settlement_amount,
            created_at: row.created_at,
            matures_at: row.matures_at,
            is_demo: row.is_demo,
            finished: row.finished,
            settled_via,
            settled_at: row.settled_at,
        })
    }
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct DbWallet {
    pub demo: f64,
    pub deposit: f64,
    pub balance: f64,
    pub bonus: f64,
    pub affiliate_earnings: f64,
}

impl From<DbWallet> for Wallet {
    fn from(row: DbWallet) -> Self {
        Wallet {
            demo: row.demo,
            deposit: row.deposit,
            balance: row.balance,
            bonus: row.bonus,
            affiliate_earnings: row.affiliate_earnings,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbAccountProfile {
    pub id: String,
    pub display_name: String,
    pub referred_by: Option<String>,
    pub is_affiliate: bool,
    pub cpa: f64,
    pub revenue_share_percent: f64,
    pub percent_per_deposit: f64,
}

impl From<DbAccountProfile> for AccountProfile {
    fn from(row: DbAccountProfile) -> Self {
        let affiliate_terms = row.is_affiliate.then_some(AffiliateTerms {
            cpa: row.cpa,
            revenue_share_percent: row.revenue_share_percent,
            percent_per_deposit: row.percent_per_deposit,
        });

        AccountProfile {
            account_id: row.id,
            display_name: row.display_name,
            referred_by: row.referred_by,
            affiliate_terms,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbLedgerEntry {
    pub id: String,
    pub beneficiary_account_id: String,
    pub source_account_id: String,
    pub operation_id: String,
    pub kind: String,
    pub base_amount: f64,
    pub paid_amount: f64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbLedgerEntry> for CommissionLedgerEntry {
    type Error = StoreError;

    fn try_from(row: DbLedgerEntry) -> Result<Self, Self::Error> {
        let kind = CommissionKind::parse(&row.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("ledger entry {} has invalid kind: {}", row.id, row.kind))
        })?;

        Ok(CommissionLedgerEntry {
            id: row.id,
            beneficiary_account_id: row.beneficiary_account_id,
            source_account_id: row.source_account_id,
            operation_id: row.operation_id,
            kind,
            base_amount: row.base_amount,
            paid_amount: row.paid_amount,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbOutboxItem {
    pub id: String,
    pub operation_id: String,
    pub sequence: i32,
    pub effect: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl TryFrom<DbOutboxItem> for OutboxItem {
    type Error = StoreError;

    fn try_from(row: DbOutboxItem) -> Result<Self, Self::Error> {
        let effect = serde_json::from_str(&row.effect)
            .map_err(|e| StoreError::Corrupt(format!("outbox effect {}: {}", row.id, e)))?;

        Ok(OutboxItem {
            id: row.id,
            operation_id: row.operation_id,
            sequence: row.sequence.max(0) as u32,
            effect,
            enqueued_at: row.enqueued_at,
            attempts: row.attempts.max(0) as u32,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbDeposit {
    pub id: String,
    pub account_id: String,
    pub amount: f64,
    pub bonus: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDeposit> for DepositTransaction {
    type Error = StoreError;

    fn try_from(row: DbDeposit) -> Result<Self, Self::Error> {
        let status = DepositStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("deposit {} has invalid status: {}", row.id, row.status))
        })?;

        Ok(DepositTransaction {
            id: row.id,
            account_id: row.account_id,
            amount: row.amount,
            bonus: row.bonus,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> DbWager {
        DbWager {
            id: "w-1".to_string(),
            account_id: "acc".to_string(),
            instrument: "BTCUSDT".to_string(),
            interval: "5m".to_string(),
            direction: "UP".to_string(),
            stake: 10.0,
            entry_price: 100.0,
            exit_price: None,
            status: "PENDING".to_string(),
            settlement_amount: 0.0,
            created_at: Utc::now(),
            matures_at: Utc::now(),
            is_demo: false,
            finished: false,
            settled_via: None,
            settled_at: None,
        }
    }

    #[test]
    fn test_wager_row_converts() {
        let wager = Wager::try_from(row()).unwrap();
        assert_eq!(wager.interval, Interval::FiveMinutes);
        assert_eq!(wager.direction, Direction::Up);
        assert_eq!(wager.status, WagerStatus::Pending);
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let mut bad = row();
        bad.status = "MAYBE".to_string();
        assert!(matches!(Wager::try_from(bad), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_outbox_row_with_bad_effect_is_corrupt() {
        let now = Utc::now();
        let row = DbOutboxItem {
            id: "o-1".to_string(),
            operation_id: "w-1".to_string(),
            sequence: 2,
            effect: r#"{"credit":{"account_id":"acc","class":"balance","amount":18.0}}"#.to_string(),
            enqueued_at: now,
            attempts: 3,
            next_attempt_at: now,
            last_error: Some("offline".to_string()),
        };

        let item = OutboxItem::try_from(row.clone()).unwrap();
        assert_eq!(item.key(), "w-1:2");
        assert_eq!(item.attempts, 3);

        let bad = DbOutboxItem {
            effect: "{}".to_string(),
            ..row
        };
        assert!(matches!(OutboxItem::try_from(bad), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_terms_only_for_affiliates() {
        let profile = AccountProfile::from(DbAccountProfile {
            id: "acc".to_string(),
            display_name: "Acc".to_string(),
            referred_by: Some("ref".to_string()),
            is_affiliate: false,
            cpa: 5.0,
            revenue_share_percent: 20.0,
            percent_per_deposit: 10.0,
        });
        assert!(profile.affiliate_terms.is_none());
        assert_eq!(profile.referred_by.as_deref(), Some("ref"));
    }
}
