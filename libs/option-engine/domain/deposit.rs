//! Deposit transactions as seen by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DepositStatus {
    Pending,
    Approved,
    Rejected,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "PENDING",
            DepositStatus::Approved => "APPROVED",
            DepositStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DepositStatus::Pending),
            "APPROVED" => Some(DepositStatus::Approved),
            "REJECTED" => Some(DepositStatus::Rejected),
            _ => None,
        }
    }
}

/// A credit transaction created by the payment gateway flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositTransaction {
    pub id: String,
    pub account_id: String,
    pub amount: f64,
    /// Promotional credit granted alongside the deposit
    pub bonus: f64,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositTransaction {
    pub fn pending(account_id: impl Into<String>, amount: f64, bonus: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            amount,
            bonus,
            status: DepositStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
