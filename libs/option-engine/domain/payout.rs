//! Payout curve
//!
//! Pure pricing for both settlement paths:
//! - **maturity**: binary, `stake * (1 + win%)` or nothing
//! - **early cash-out**: interpolates toward the maturity payout as time
//!   passes when the wager is on the right side, and decays toward 1% of the
//!   recoverable amount when it is on the wrong side
//!
//! The observed move is amplified by [`DISPLAY_MOVE_MULTIPLIER`], the same
//! factor clients use to draw live P/L, so the cash-out quote matches what the
//! user sees on screen.

use chrono::{DateTime, Utc};

use super::wager::{Direction, WagerStatus};

/// Payout percentage used when the operator value is missing or not positive
pub const DEFAULT_WIN_PERCENT: f64 = 80.0;

/// Amplification applied to the real percentage move
pub const DISPLAY_MOVE_MULTIPLIER: f64 = 50.0;

/// Floor of the time-decay factor on a losing cash-out
pub const MIN_LOSING_RECOVERY: f64 = 0.01;

/// Replace a misconfigured win percentage with the default
pub fn effective_win_percent(configured: Option<f64>) -> f64 {
    match configured {
        Some(pct) if pct.is_finite() && pct > 0.0 => pct,
        _ => DEFAULT_WIN_PERCENT,
    }
}

/// Absolute move from entry, in percent
pub fn real_move_pct(entry_price: f64, price: f64) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    ((price - entry_price) / entry_price * 100.0).abs()
}

pub fn display_move_pct(entry_price: f64, price: f64) -> f64 {
    real_move_pct(entry_price, price) * DISPLAY_MOVE_MULTIPLIER
}

/// Share of the wager window already elapsed, clamped to [0, 1]
///
/// A window of zero or negative length counts as fully elapsed.
pub fn time_elapsed_fraction(
    created_at: DateTime<Utc>,
    matures_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let total_ms = (matures_at - created_at).num_milliseconds();
    if total_ms <= 0 {
        return 1.0;
    }
    let remaining_ms = (matures_at - now).num_milliseconds();
    (1.0 - remaining_ms as f64 / total_ms as f64).clamp(0.0, 1.0)
}

/// Whether the price moved the way the wager predicted; no move loses
pub fn is_correct(direction: Direction, entry_price: f64, price: f64) -> bool {
    Direction::observed(entry_price, price) == Some(direction)
}

/// Amount paid for a winning wager at maturity
pub fn maturity_payout(stake: f64, win_percent: f64) -> f64 {
    stake + stake * (win_percent / 100.0)
}

/// Priced outcome of a settlement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayoutQuote {
    pub status: WagerStatus,
    pub amount: f64,
}

/// Everything the curve needs to price one wager
#[derive(Debug, Clone, Copy)]
pub struct CurveInputs {
    pub stake: f64,
    pub entry_price: f64,
    pub price: f64,
    pub direction: Direction,
    pub win_percent: f64,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Binary settlement at maturity
pub fn at_maturity(
    stake: f64,
    entry_price: f64,
    price: f64,
    direction: Direction,
    win_percent: f64,
) -> PayoutQuote {
    if is_correct(direction, entry_price, price) {
        PayoutQuote {
            status: WagerStatus::Won,
            amount: maturity_payout(stake, win_percent),
        }
    } else {
        PayoutQuote {
            status: WagerStatus::Lost,
            amount: 0.0,
        }
    }
}

/// Early settlement requested by the user
pub fn early_cash_out(inputs: &CurveInputs) -> PayoutQuote {
    let display = display_move_pct(inputs.entry_price, inputs.price);
    let elapsed = time_elapsed_fraction(inputs.created_at, inputs.matures_at, inputs.now);
    let stake = inputs.stake;

    if is_correct(inputs.direction, inputs.entry_price, inputs.price) {
        let full = maturity_payout(stake, inputs.win_percent);
        let capped = display.min(inputs.win_percent);
        let by_move = (stake + stake * (capped / 100.0)).min(full);

        PayoutQuote {
            status: WagerStatus::Won,
            amount: by_move + (full - by_move) * elapsed,
        }
    } else {
        let recoverable = (stake - stake * (display / 100.0)).max(0.0);
        let decay = (1.0 - elapsed).max(MIN_LOSING_RECOVERY);

        PayoutQuote {
            status: WagerStatus::Lost,
            amount: recoverable * decay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let created = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        (created, created + Duration::minutes(1))
    }

    fn inputs(price: f64, direction: Direction, now_offset_secs: i64) -> CurveInputs {
        let (created_at, matures_at) = window();
        CurveInputs {
            stake: 10.0,
            entry_price: 100.0,
            price,
            direction,
            win_percent: 80.0,
            created_at,
            matures_at,
            now: created_at + Duration::seconds(now_offset_secs),
        }
    }

    #[test]
    fn test_effective_win_percent() {
        assert_eq!(effective_win_percent(None), 80.0);
        assert_eq!(effective_win_percent(Some(0.0)), 80.0);
        assert_eq!(effective_win_percent(Some(-5.0)), 80.0);
        assert_eq!(effective_win_percent(Some(f64::NAN)), 80.0);
        assert_eq!(effective_win_percent(Some(90.0)), 90.0);
    }

    #[test]
    fn test_maturity_win_and_loss() {
        let win = at_maturity(10.0, 100.0, 105.0, Direction::Up, 80.0);
        assert_eq!(win.status, WagerStatus::Won);
        assert!((win.amount - 18.0).abs() < 1e-9);

        let loss = at_maturity(10.0, 100.0, 95.0, Direction::Up, 80.0);
        assert_eq!(loss.status, WagerStatus::Lost);
        assert_eq!(loss.amount, 0.0);
    }

    #[test]
    fn test_unchanged_price_loses() {
        let quote = at_maturity(10.0, 100.0, 100.0, Direction::Down, 80.0);
        assert_eq!(quote.status, WagerStatus::Lost);
    }

    #[test]
    fn test_time_elapsed_fraction_bounds() {
        let (created, matures) = window();
        assert_eq!(time_elapsed_fraction(created, matures, created), 0.0);
        assert_eq!(time_elapsed_fraction(created, matures, matures), 1.0);
        assert_eq!(time_elapsed_fraction(created, matures, matures + Duration::seconds(30)), 1.0);
        assert_eq!(time_elapsed_fraction(created, matures, created - Duration::seconds(30)), 0.0);
        assert!((time_elapsed_fraction(created, matures, created + Duration::seconds(30)) - 0.5).abs() < 1e-9);
        assert_eq!(time_elapsed_fraction(created, created, created), 1.0);
    }

    #[test]
    fn test_winning_cash_out_at_open_pays_by_move() {
        // 0.1% real move -> 5% displayed
        let quote = early_cash_out(&inputs(100.1, Direction::Up, 0));
        assert_eq!(quote.status, WagerStatus::Won);
        assert!((quote.amount - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_winning_cash_out_halfway_interpolates() {
        let quote = early_cash_out(&inputs(100.1, Direction::Up, 30));
        // 10.5 + (18 - 10.5) * 0.5
        assert!((quote.amount - 14.25).abs() < 1e-9);
    }

    #[test]
    fn test_winning_move_is_capped_at_win_percent() {
        // 5% real move -> 250% displayed, capped at 80%
        let quote = early_cash_out(&inputs(105.0, Direction::Up, 0));
        assert!((quote.amount - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_losing_cash_out_decays_with_time() {
        // 0.1% against -> 5% displayed -> 9.5 recoverable
        let early = early_cash_out(&inputs(99.9, Direction::Up, 0));
        assert_eq!(early.status, WagerStatus::Lost);
        assert!((early.amount - 9.5).abs() < 1e-9);

        let late = early_cash_out(&inputs(99.9, Direction::Up, 45));
        assert!((late.amount - 9.5 * 0.25).abs() < 1e-9);

        let at_end = early_cash_out(&inputs(99.9, Direction::Up, 60));
        assert!((at_end.amount - 9.5 * MIN_LOSING_RECOVERY).abs() < 1e-9);
    }

    #[test]
    fn test_losing_cash_out_never_negative() {
        // 3% against -> 150% displayed -> nothing recoverable
        let quote = early_cash_out(&inputs(103.0, Direction::Down, 10));
        assert_eq!(quote.amount, 0.0);
    }
}
