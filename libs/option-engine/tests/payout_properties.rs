//! Property-based tests for the payout curve
//!
//! Uses proptest to verify invariants that should hold for all inputs.
//!
//! Run with: cargo test -p option-engine --test payout_properties

use chrono::{DateTime, Duration, TimeZone, Utc};
use option_engine::domain::payout::{
    at_maturity, early_cash_out, maturity_payout, CurveInputs, MIN_LOSING_RECOVERY,
};
use option_engine::domain::{Direction, WagerStatus};
use proptest::prelude::*;

fn created() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Up), Just(Direction::Down)]
}

/// Price on the winning side of `entry` for `direction`
fn winning_price(direction: Direction, entry: f64, move_frac: f64) -> f64 {
    match direction {
        Direction::Up => entry * (1.0 + move_frac),
        Direction::Down => entry * (1.0 - move_frac),
    }
}

fn losing_price(direction: Direction, entry: f64, move_frac: f64) -> f64 {
    winning_price(direction.opposite(), entry, move_frac)
}

fn inputs(stake: f64, entry: f64, price: f64, direction: Direction, win: f64, elapsed_ms: i64) -> CurveInputs {
    let created_at = created();
    CurveInputs {
        stake,
        entry_price: entry,
        price,
        direction,
        win_percent: win,
        created_at,
        matures_at: created_at + Duration::minutes(5),
        now: created_at + Duration::milliseconds(elapsed_ms),
    }
}

// ============================================================================
// Early cash-out
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Waiting longer never lowers a winning cash-out
    #[test]
    fn winning_cash_out_non_decreasing_in_time(
        stake in 0.01..10_000.0f64,
        entry in 0.01..100_000.0f64,
        move_frac in 0.000_01..0.5f64,
        win in 1.0..200.0f64,
        direction in direction(),
        t1 in 0i64..300_000,
        t2 in 0i64..300_000,
    ) {
        let (early, late) = (t1.min(t2), t1.max(t2));
        let price = winning_price(direction, entry, move_frac);

        let a = early_cash_out(&inputs(stake, entry, price, direction, win, early));
        let b = early_cash_out(&inputs(stake, entry, price, direction, win, late));

        prop_assume!(a.status == WagerStatus::Won);
        prop_assert!(b.amount + 1e-9 >= a.amount, "{} at {}ms > {} at {}ms", a.amount, early, b.amount, late);
        prop_assert!(b.amount <= maturity_payout(stake, win) + 1e-9);
    }

    /// A losing cash-out keeps at least 1% of what is still recoverable
    #[test]
    fn losing_cash_out_keeps_minimum_recovery(
        stake in 0.01..10_000.0f64,
        entry in 0.01..100_000.0f64,
        move_frac in 0.0..0.001f64,
        win in 1.0..200.0f64,
        direction in direction(),
        elapsed in 0i64..600_000,
    ) {
        let price = losing_price(direction, entry, move_frac);
        let quote = early_cash_out(&inputs(stake, entry, price, direction, win, elapsed));

        prop_assert_eq!(quote.status, WagerStatus::Lost);

        let display_move = ((price - entry) / entry * 100.0).abs() * 50.0;
        let recoverable = (stake - stake * display_move / 100.0).max(0.0);
        prop_assert!(quote.amount + 1e-9 >= recoverable * MIN_LOSING_RECOVERY);
        prop_assert!(quote.amount <= stake + 1e-9);
    }

    /// No path ever pays a negative amount
    #[test]
    fn amounts_never_negative(
        stake in 0.01..10_000.0f64,
        entry in 0.01..100_000.0f64,
        price in 0.01..100_000.0f64,
        win in 1.0..200.0f64,
        direction in direction(),
        elapsed in -60_000i64..600_000,
    ) {
        let early = early_cash_out(&inputs(stake, entry, price, direction, win, elapsed));
        let mature = at_maturity(stake, entry, price, direction, win);

        prop_assert!(early.amount >= 0.0);
        prop_assert!(mature.amount >= 0.0);
    }

    /// Maturity is binary: full payout or nothing
    #[test]
    fn maturity_is_all_or_nothing(
        stake in 0.01..10_000.0f64,
        entry in 0.01..100_000.0f64,
        price in 0.01..100_000.0f64,
        win in 1.0..200.0f64,
        direction in direction(),
    ) {
        let quote = at_maturity(stake, entry, price, direction, win);
        match quote.status {
            WagerStatus::Won => prop_assert!((quote.amount - stake * (1.0 + win / 100.0)).abs() < 1e-6),
            _ => prop_assert_eq!(quote.amount, 0.0),
        }
    }
}
