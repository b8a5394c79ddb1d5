//! Referral cascade
//!
//! Turns a settled wager or an approved deposit into commission effects.
//! The referral relation is walked upward at most [`MAX_CASCADE_DEPTH`]
//! levels; every commission is one ledger entry plus one affiliate balance
//! adjustment, recorded even when the amount is zero.
//!
//! Ledger `base_amount`: the stake for every wager commission (sub-affiliate
//! included), the commission itself for deposit commissions.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    AccountProfile, CommissionKind, CommissionLedgerEntry, DepositTransaction, Effect, Wager,
    WagerStatus, MAX_CASCADE_DEPTH, SUB_AFFILIATE_PERCENT,
};
use crate::infrastructure::clock::SharedClock;
use crate::infrastructure::ports::{ReferralDirectory, StoreResult};

#[derive(Clone)]
pub struct ReferralCascade {
    directory: Arc<dyn ReferralDirectory>,
    clock: SharedClock,
}

impl ReferralCascade {
    pub fn new(directory: Arc<dyn ReferralDirectory>, clock: SharedClock) -> Self {
        Self { directory, clock }
    }

    /// Referrers of `account_id`, nearest first, at most `depth` of them
    ///
    /// Stops early at an unknown account or a loop in the relation.
    pub async fn referrer_chain(&self, account_id: &str, depth: usize) -> StoreResult<Vec<AccountProfile>> {
        let depth = depth.min(MAX_CASCADE_DEPTH);
        let mut chain = Vec::with_capacity(depth);
        let mut seen: HashSet<String> = HashSet::from([account_id.to_string()]);

        let mut next = match self.directory.profile(account_id).await? {
            Some(profile) => profile.referred_by,
            None => None,
        };

        while chain.len() < depth {
            let Some(referrer_id) = next.take() else { break };
            if !seen.insert(referrer_id.clone()) {
                debug!(account_id, referrer = %referrer_id, "Referral loop, stopping walk");
                break;
            }

            match self.directory.profile(&referrer_id).await? {
                Some(profile) => {
                    next = profile.referred_by.clone();
                    chain.push(profile);
                }
                None => break,
            }
        }

        Ok(chain)
    }

    /// Commission effects for a terminal wager; empty for demo or unreferred
    pub async fn plan_for_wager(&self, wager: &Wager, outcome: WagerStatus) -> StoreResult<Vec<Effect>> {
        if wager.is_demo || !outcome.is_terminal() {
            return Ok(Vec::new());
        }

        let chain = self.referrer_chain(&wager.account_id, MAX_CASCADE_DEPTH).await?;
        let Some(level_one) = chain.first() else {
            return Ok(Vec::new());
        };
        let Some(terms) = level_one.affiliate_terms else {
            debug!(wager_id = %wager.id, referrer = %level_one.account_id, "Referrer has no affiliate terms");
            return Ok(Vec::new());
        };

        let now = self.clock.now();
        let mut effects = Vec::with_capacity(4);

        match outcome {
            WagerStatus::Lost => {
                let commission = terms.loss_commission(wager.stake);
                push_commission(
                    &mut effects,
                    CommissionLedgerEntry::new(
                        &level_one.account_id,
                        &wager.account_id,
                        &wager.id,
                        CommissionKind::RevShareLoss,
                        wager.stake,
                        commission,
                        now,
                    ),
                );

                if let Some(level_two) = chain.get(1) {
                    let sub = commission * (SUB_AFFILIATE_PERCENT / 100.0);
                    push_commission(
                        &mut effects,
                        CommissionLedgerEntry::new(
                            &level_two.account_id,
                            &wager.account_id,
                            &wager.id,
                            CommissionKind::SubAffiliate,
                            wager.stake,
                            sub,
                            now,
                        ),
                    );
                }
            }
            WagerStatus::Won => {
                push_commission(
                    &mut effects,
                    CommissionLedgerEntry::new(
                        &level_one.account_id,
                        &wager.account_id,
                        &wager.id,
                        CommissionKind::RevShareWinReversal,
                        wager.stake,
                        -wager.stake,
                        now,
                    ),
                );
            }
            WagerStatus::Pending => {}
        }

        Ok(effects)
    }

    /// Commission effects for an approved deposit (level one only)
    pub async fn plan_for_deposit(&self, deposit: &DepositTransaction, first_deposit: bool) -> StoreResult<Vec<Effect>> {
        let chain = self.referrer_chain(&deposit.account_id, 1).await?;
        let Some(referrer) = chain.first() else {
            return Ok(Vec::new());
        };
        let Some(terms) = referrer.affiliate_terms else {
            return Ok(Vec::new());
        };

        let (kind, paid) = if first_deposit {
            (CommissionKind::Cpa, terms.cpa)
        } else {
            (CommissionKind::PercentDeposit, terms.deposit_commission(deposit.amount))
        };

        let mut effects = Vec::with_capacity(2);
        push_commission(
            &mut effects,
            CommissionLedgerEntry::new(
                &referrer.account_id,
                &deposit.account_id,
                &deposit.id,
                kind,
                paid,
                paid,
                self.clock.now(),
            ),
        );
        Ok(effects)
    }
}

/// Ledger entry first, then the balance it justifies
fn push_commission(effects: &mut Vec<Effect>, entry: CommissionLedgerEntry) {
    let adjust = Effect::AdjustAffiliate {
        account_id: entry.beneficiary_account_id.clone(),
        amount: entry.paid_amount,
    };
    effects.push(Effect::AppendLedger { entry });
    effects.push(adjust);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AffiliateTerms, Direction, Interval};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::memory::InMemoryDirectory;
    use chrono::Utc;

    fn terms() -> AffiliateTerms {
        AffiliateTerms {
            cpa: 5.0,
            revenue_share_percent: 20.0,
            percent_per_deposit: 10.0,
        }
    }

    fn cascade(directory: InMemoryDirectory) -> ReferralCascade {
        ReferralCascade::new(Arc::new(directory), Arc::new(ManualClock::at_millis(0)))
    }

    fn wager(is_demo: bool) -> Wager {
        Wager::new("user", "BTCUSDT", Interval::OneMinute, Direction::Up, 10.0, 100.0, Utc::now(), is_demo)
    }

    fn adjustments(effects: &[Effect]) -> Vec<(String, f64)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::AdjustAffiliate { account_id, amount } => Some((account_id.clone(), *amount)),
                _ => None,
            })
            .collect()
    }

    fn ledger_entries(effects: &[Effect]) -> Vec<CommissionLedgerEntry> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::AppendLedger { entry } => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    fn two_levels() -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.insert(AccountProfile::new("top"));
        directory.insert(AccountProfile::new("ref").referred_by("top").with_terms(terms()));
        directory.insert(AccountProfile::new("user").referred_by("ref"));
        directory
    }

    #[tokio::test]
    async fn test_loss_pays_both_levels() {
        let effects = cascade(two_levels()).plan_for_wager(&wager(false), WagerStatus::Lost).await.unwrap();

        let paid = adjustments(&effects);
        assert_eq!(paid.len(), 2);
        assert_eq!(paid[0].0, "ref");
        assert!((paid[0].1 - 2.0).abs() < 1e-9);
        assert_eq!(paid[1].0, "top");
        assert!((paid[1].1 - 0.16).abs() < 1e-9);

        let bases: Vec<f64> = ledger_entries(&effects).iter().map(|e| e.base_amount).collect();
        assert_eq!(bases, vec![10.0, 10.0]);
    }

    #[tokio::test]
    async fn test_win_reverses_full_stake_at_level_one_only() {
        let effects = cascade(two_levels()).plan_for_wager(&wager(false), WagerStatus::Won).await.unwrap();

        assert_eq!(adjustments(&effects), vec![("ref".to_string(), -10.0)]);
        match &effects[0] {
            Effect::AppendLedger { entry } => {
                assert_eq!(entry.kind, CommissionKind::RevShareWinReversal);
                assert_eq!(entry.paid_amount, -10.0);
            }
            other => panic!("expected ledger entry first, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_demo_and_unreferred_produce_nothing() {
        let c = cascade(two_levels());
        assert!(c.plan_for_wager(&wager(true), WagerStatus::Lost).await.unwrap().is_empty());

        let alone = InMemoryDirectory::new();
        alone.insert(AccountProfile::new("user"));
        let c = cascade(alone);
        assert!(c.plan_for_wager(&wager(false), WagerStatus::Lost).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_referrer_without_terms_is_not_paid() {
        let directory = InMemoryDirectory::new();
        directory.insert(AccountProfile::new("ref"));
        directory.insert(AccountProfile::new("user").referred_by("ref"));

        let effects = cascade(directory).plan_for_wager(&wager(false), WagerStatus::Lost).await.unwrap();
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_walk_is_bounded_and_survives_loops() {
        let directory = InMemoryDirectory::new();
        directory.insert(AccountProfile::new("a").referred_by("b"));
        directory.insert(AccountProfile::new("b").referred_by("a").with_terms(terms()));
        directory.insert(AccountProfile::new("user").referred_by("a"));

        let chain = cascade(directory).referrer_chain("user", 10).await.unwrap();
        let ids: Vec<&str> = chain.iter().map(|p| p.account_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_first_deposit_pays_cpa_then_percent() {
        let c = cascade(two_levels());
        let deposit = DepositTransaction::pending("user", 100.0, 0.0, Utc::now());

        let first = c.plan_for_deposit(&deposit, true).await.unwrap();
        assert_eq!(adjustments(&first), vec![("ref".to_string(), 5.0)]);
        assert_eq!(ledger_entries(&first)[0].base_amount, 5.0);

        let later = c.plan_for_deposit(&deposit, false).await.unwrap();
        assert_eq!(adjustments(&later), vec![("ref".to_string(), 10.0)]);
        assert_eq!(ledger_entries(&later)[0].base_amount, 10.0);
    }

    #[tokio::test]
    async fn test_zero_commission_is_still_recorded() {
        let directory = InMemoryDirectory::new();
        directory.insert(AccountProfile::new("ref").with_terms(AffiliateTerms::default()));
        directory.insert(AccountProfile::new("user").referred_by("ref"));

        let effects = cascade(directory).plan_for_wager(&wager(false), WagerStatus::Lost).await.unwrap();
        assert_eq!(effects.len(), 2);
        assert_eq!(adjustments(&effects), vec![("ref".to_string(), 0.0)]);
    }
}
