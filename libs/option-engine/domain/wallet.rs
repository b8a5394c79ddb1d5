//! Wallet fragment the engine mutates
//!
//! The account store owns the wallet; the engine only needs these five
//! sub-balances and the order in which a stake consumes them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StoreError;

/// Starting demo balance for new accounts
pub const DEFAULT_DEMO_BALANCE: f64 = 10_000.0;

/// Sub-balance of an account wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceClass {
    Demo,
    Deposit,
    Balance,
    Bonus,
    Affiliate,
}

impl BalanceClass {
    /// Affiliate earnings absorb win reversals and may go below zero
    pub fn allows_negative(&self) -> bool {
        matches!(self, BalanceClass::Affiliate)
    }

    /// Class that receives a wager payout
    pub fn payout_class(is_demo: bool) -> Self {
        if is_demo {
            BalanceClass::Demo
        } else {
            BalanceClass::Balance
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            BalanceClass::Demo => "demo",
            BalanceClass::Deposit => "deposit",
            BalanceClass::Balance => "balance",
            BalanceClass::Bonus => "bonus",
            BalanceClass::Affiliate => "affiliate_earnings",
        }
    }
}

impl fmt::Display for BalanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// Per-class breakdown of how a stake was paid for
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StakeFunding {
    pub demo: f64,
    pub bonus: f64,
    pub deposit: f64,
    pub balance: f64,
}

impl StakeFunding {
    pub fn total(&self) -> f64 {
        self.demo + self.bonus + self.deposit + self.balance
    }

    /// Split a real-money stake across bonus, then deposit, then balance
    pub fn split(stake: f64, bonus: f64, deposit: f64) -> Self {
        let mut remaining = stake;

        let from_bonus = remaining.min(bonus.max(0.0));
        remaining -= from_bonus;

        let from_deposit = remaining.min(deposit.max(0.0));
        remaining -= from_deposit;

        Self {
            demo: 0.0,
            bonus: from_bonus,
            deposit: from_deposit,
            balance: remaining,
        }
    }

    /// Non-zero portions in refund order
    pub fn portions(&self) -> Vec<(BalanceClass, f64)> {
        [
            (BalanceClass::Demo, self.demo),
            (BalanceClass::Bonus, self.bonus),
            (BalanceClass::Deposit, self.deposit),
            (BalanceClass::Balance, self.balance),
        ]
        .into_iter()
        .filter(|(_, amount)| *amount > 0.0)
        .collect()
    }
}

/// Balances of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub demo: f64,
    pub deposit: f64,
    pub balance: f64,
    pub bonus: f64,
    pub affiliate_earnings: f64,
}

impl Default for Wallet {
    fn default() -> Self {
        Self {
            demo: DEFAULT_DEMO_BALANCE,
            deposit: 0.0,
            balance: 0.0,
            bonus: 0.0,
            affiliate_earnings: 0.0,
        }
    }
}

impl Wallet {
    pub fn get(&self, class: BalanceClass) -> f64 {
        match class {
            BalanceClass::Demo => self.demo,
            BalanceClass::Deposit => self.deposit,
            BalanceClass::Balance => self.balance,
            BalanceClass::Bonus => self.bonus,
            BalanceClass::Affiliate => self.affiliate_earnings,
        }
    }

    fn slot(&mut self, class: BalanceClass) -> &mut f64 {
        match class {
            BalanceClass::Demo => &mut self.demo,
            BalanceClass::Deposit => &mut self.deposit,
            BalanceClass::Balance => &mut self.balance,
            BalanceClass::Bonus => &mut self.bonus,
            BalanceClass::Affiliate => &mut self.affiliate_earnings,
        }
    }

    /// Funds that can back a stake
    pub fn stakeable(&self, is_demo: bool) -> f64 {
        if is_demo {
            self.demo
        } else {
            self.bonus + self.deposit + self.balance
        }
    }

    pub fn credit(&mut self, class: BalanceClass, amount: f64) {
        *self.slot(class) += amount;
    }

    pub fn debit(&mut self, class: BalanceClass, amount: f64) -> Result<(), StoreError> {
        let current = self.get(class);
        if !class.allows_negative() && current < amount {
            return Err(StoreError::InsufficientFunds {
                required: amount,
                available: current,
            });
        }
        *self.slot(class) -= amount;
        Ok(())
    }

    /// Take a stake out of the wallet, all or nothing
    pub fn fund_stake(&mut self, stake: f64, is_demo: bool) -> Result<StakeFunding, StoreError> {
        let available = self.stakeable(is_demo);
        if stake > available {
            return Err(StoreError::InsufficientFunds {
                required: stake,
                available,
            });
        }

        let funding = if is_demo {
            StakeFunding {
                demo: stake,
                ..StakeFunding::default()
            }
        } else {
            StakeFunding::split(stake, self.bonus, self.deposit)
        };

        for (class, amount) in funding.portions() {
            *self.slot(class) -= amount;
        }

        Ok(funding)
    }

    /// Put a stake back exactly where it came from
    pub fn refund_stake(&mut self, funding: &StakeFunding) {
        for (class, amount) in funding.portions() {
            *self.slot(class) += amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_wallet(bonus: f64, deposit: f64, balance: f64) -> Wallet {
        Wallet {
            demo: 0.0,
            deposit,
            balance,
            bonus,
            affiliate_earnings: 0.0,
        }
    }

    #[test]
    fn test_stake_consumes_bonus_then_deposit_then_balance() {
        let mut wallet = real_wallet(3.0, 4.0, 10.0);
        let funding = wallet.fund_stake(10.0, false).unwrap();

        assert_eq!(funding.bonus, 3.0);
        assert_eq!(funding.deposit, 4.0);
        assert_eq!(funding.balance, 3.0);
        assert_eq!(wallet.bonus, 0.0);
        assert_eq!(wallet.deposit, 0.0);
        assert_eq!(wallet.balance, 7.0);
    }

    #[test]
    fn test_insufficient_funds_leaves_wallet_untouched() {
        let mut wallet = real_wallet(1.0, 1.0, 1.0);
        let before = wallet.clone();

        let err = wallet.fund_stake(5.0, false).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
        assert_eq!(wallet, before);
    }

    #[test]
    fn test_demo_stake_uses_demo_only() {
        let mut wallet = Wallet::default();
        wallet.balance = 50.0;

        let funding = wallet.fund_stake(100.0, true).unwrap();
        assert_eq!(funding.demo, 100.0);
        assert_eq!(wallet.demo, DEFAULT_DEMO_BALANCE - 100.0);
        assert_eq!(wallet.balance, 50.0);
    }

    #[test]
    fn test_refund_restores_each_class() {
        let mut wallet = real_wallet(2.0, 2.0, 2.0);
        let before = wallet.clone();

        let funding = wallet.fund_stake(5.0, false).unwrap();
        wallet.refund_stake(&funding);

        assert_eq!(wallet, before);
    }

    #[test]
    fn test_affiliate_may_go_negative() {
        let mut wallet = real_wallet(0.0, 0.0, 0.0);
        wallet.debit(BalanceClass::Affiliate, 10.0).unwrap();
        assert_eq!(wallet.affiliate_earnings, -10.0);

        assert!(wallet.debit(BalanceClass::Balance, 1.0).is_err());
    }
}
