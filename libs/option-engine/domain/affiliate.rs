//! Referral and commission entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Referral levels walked by the cascade
pub const MAX_CASCADE_DEPTH: usize = 2;

/// Share of the level-1 loss commission paid to the level-2 referrer
pub const SUB_AFFILIATE_PERCENT: f64 = 8.0;

/// What a commission payment was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionKind {
    Cpa,
    PercentDeposit,
    RevShareLoss,
    RevShareWinReversal,
    SubAffiliate,
}

impl CommissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionKind::Cpa => "CPA",
            CommissionKind::PercentDeposit => "PERCENT_DEPOSIT",
            CommissionKind::RevShareLoss => "REV_SHARE_LOSS",
            CommissionKind::RevShareWinReversal => "REV_SHARE_WIN_REVERSAL",
            CommissionKind::SubAffiliate => "SUB_AFFILIATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CPA" => Some(CommissionKind::Cpa),
            "PERCENT_DEPOSIT" => Some(CommissionKind::PercentDeposit),
            "REV_SHARE_LOSS" => Some(CommissionKind::RevShareLoss),
            "REV_SHARE_WIN_REVERSAL" => Some(CommissionKind::RevShareWinReversal),
            "SUB_AFFILIATE" => Some(CommissionKind::SubAffiliate),
            _ => None,
        }
    }
}

impl fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable audit record of one commission payment
///
/// `paid_amount` is signed; win reversals carry a negative amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionLedgerEntry {
    pub id: String,
    pub beneficiary_account_id: String,
    pub source_account_id: String,
    pub operation_id: String,
    pub kind: CommissionKind,
    pub base_amount: f64,
    pub paid_amount: f64,
    pub created_at: DateTime<Utc>,
}

impl CommissionLedgerEntry {
    pub fn new(
        beneficiary_account_id: impl Into<String>,
        source_account_id: impl Into<String>,
        operation_id: impl Into<String>,
        kind: CommissionKind,
        base_amount: f64,
        paid_amount: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            beneficiary_account_id: beneficiary_account_id.into(),
            source_account_id: source_account_id.into(),
            operation_id: operation_id.into(),
            kind,
            base_amount,
            paid_amount,
            created_at,
        }
    }
}

/// Commission terms negotiated with an affiliate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AffiliateTerms {
    /// Fixed payout on a referred user's first approved deposit
    pub cpa: f64,
    /// Percent of a referred user's losing stake
    pub revenue_share_percent: f64,
    /// Percent of each later approved deposit
    pub percent_per_deposit: f64,
}

impl AffiliateTerms {
    pub fn loss_commission(&self, stake: f64) -> f64 {
        stake * (self.revenue_share_percent / 100.0)
    }

    pub fn deposit_commission(&self, amount: f64) -> f64 {
        (amount / 100.0) * self.percent_per_deposit
    }
}

/// The slice of an account the cascade reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_id: String,
    pub display_name: String,
    /// Account id of whoever referred this account
    pub referred_by: Option<String>,
    /// Present only for accounts enrolled as affiliates
    pub affiliate_terms: Option<AffiliateTerms>,
}

impl AccountProfile {
    pub fn new(account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        Self {
            display_name: account_id.clone(),
            account_id,
            referred_by: None,
            affiliate_terms: None,
        }
    }

    pub fn referred_by(mut self, referrer: impl Into<String>) -> Self {
        self.referred_by = Some(referrer.into());
        self
    }

    pub fn with_terms(mut self, terms: AffiliateTerms) -> Self {
        self.affiliate_terms = Some(terms);
        self
    }
}
