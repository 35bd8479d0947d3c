//! Property-based tests for the commission cascade plan.
//!
//! - Conservation: credited commissions equal amount × Σ rates of present levels
//! - Rounding stays within half a minor unit per level
//! - Only present levels are paid, in ascending order

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::cascade::CommissionCascade;
use crate::domain::commission::RateSchedule;
use crate::domain::ids::UserId;
use crate::domain::referral::Ancestors;

/// Strategy to generate whole-unit deposit amounts (10 to 100,000).
fn whole_amount() -> impl Strategy<Value = Decimal> {
    (10i64..=100_000i64).prop_map(Decimal::from)
}

/// Strategy to generate cent-precision deposit amounts (10.00 to 100,000.00).
fn cent_amount() -> impl Strategy<Value = Decimal> {
    (1_000i64..=10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy to generate the number of ancestors a depositor has.
fn depth() -> impl Strategy<Value = usize> {
    0usize..=5
}

fn ancestors_of_depth(depth: usize) -> Ancestors {
    let mut ancestors = Ancestors::none();
    for _ in 0..depth {
        ancestors = Ancestors::under(UserId::new(), &ancestors);
    }
    ancestors
}

fn rate_sum(cascade: &CommissionCascade, depth: usize) -> Decimal {
    cascade.rates().rates().iter().take(depth).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// With whole-unit amounts and two-place rates no rounding occurs, so the
    /// credited total is exactly amount × Σ rates.
    #[test]
    fn prop_conservation_is_exact_for_whole_amounts(
        amount in whole_amount(),
        depth in depth(),
    ) {
        let cascade = CommissionCascade::new(RateSchedule::default(), 2);
        let ancestors = ancestors_of_depth(depth);

        let plan = cascade.plan(amount, &ancestors);
        let total: Decimal = plan.iter().map(|p| p.amount).sum();

        prop_assert_eq!(total, amount * rate_sum(&cascade, depth));
    }

    /// Each level rounds at most half a minor unit away from the exact share.
    #[test]
    fn prop_rounding_error_is_bounded(
        amount in cent_amount(),
        depth in depth(),
    ) {
        let cascade = CommissionCascade::new(RateSchedule::default(), 2);
        let ancestors = ancestors_of_depth(depth);

        let plan = cascade.plan(amount, &ancestors);
        let total: Decimal = plan.iter().map(|p| p.amount).sum();
        let exact = amount * rate_sum(&cascade, depth);
        let bound = dec!(0.005) * Decimal::from(plan.len());

        prop_assert!(
            (total - exact).abs() <= bound,
            "total {} deviates from {} by more than {}",
            total, exact, bound
        );
        for step in &plan {
            prop_assert!(step.amount.scale() <= 2);
        }
    }

    /// Exactly the present levels are paid, ascending, each to its own ancestor.
    #[test]
    fn prop_plan_follows_ancestors(
        amount in cent_amount(),
        depth in depth(),
    ) {
        let cascade = CommissionCascade::new(RateSchedule::default(), 2);
        let ancestors = ancestors_of_depth(depth);

        let plan = cascade.plan(amount, &ancestors);
        prop_assert_eq!(plan.len(), depth);
        for (step, (level, referrer)) in plan.iter().zip(ancestors.iter()) {
            prop_assert_eq!(step.level, level);
            prop_assert_eq!(step.referrer_id, referrer);
            prop_assert!(step.amount > Decimal::ZERO);
        }
    }
}
