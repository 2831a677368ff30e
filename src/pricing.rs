use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::errors::ApiError;

/// Platform/affiliate split for one order amount. `commission` plus
/// `affiliate_amount` always reconstructs the order amount up to 2-decimal
/// rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Split {
    pub commission: Decimal,
    pub affiliate_amount: Decimal,
}

/// Derive the platform commission from a base amount and a fee rate.
///
/// This is the only place the 2-decimal rounding happens; order creation and
/// payment settlement must both go through here so the two sites can never
/// disagree on the math.
pub fn compute_split(amount: Decimal, fee_rate: Decimal) -> Result<Split, ApiError> {
    if amount.is_sign_negative() {
        return Err(ApiError::validation("amount must not be negative"));
    }
    if fee_rate.is_sign_negative() || fee_rate > Decimal::ONE {
        return Err(ApiError::validation("fee rate must be between 0 and 1"));
    }

    let commission =
        (amount * fee_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    Ok(settlement_split(amount, commission))
}

/// Split an amount against an already-fixed commission, as stored on the
/// order at creation time. Settlement uses this with the order's snapshot so
/// a fee-rate change between creation and payment cannot drift the ledger.
pub fn settlement_split(amount: Decimal, commission: Decimal) -> Split {
    let affiliate_amount = (amount - commission).max(Decimal::ZERO);
    Split {
        commission,
        affiliate_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn five_percent_of_one_hundred() {
        let split = compute_split(dec("100.00"), dec("0.05")).unwrap();
        assert_eq!(split.commission, dec("5.00"));
        assert_eq!(split.affiliate_amount, dec("95.00"));
    }

    #[test]
    fn rounds_commission_to_two_decimals() {
        // 19.99 * 0.05 = 0.9995, rounds up to 1.00
        let split = compute_split(dec("19.99"), dec("0.05")).unwrap();
        assert_eq!(split.commission, dec("1.00"));
        assert_eq!(split.affiliate_amount, dec("18.99"));
    }

    #[test]
    fn parts_always_rebuild_the_amount() {
        for (amount, rate) in [
            ("0", "0"),
            ("0.01", "0.05"),
            ("33.33", "0.075"),
            ("249.99", "0.05"),
            ("1000", "1"),
        ] {
            let amount = dec(amount);
            let split = compute_split(amount, dec(rate)).unwrap();
            assert_eq!(
                split.commission + split.affiliate_amount,
                amount,
                "split of {amount} at rate {rate} must balance"
            );
        }
    }

    #[test]
    fn full_fee_rate_leaves_affiliate_nothing() {
        let split = compute_split(dec("50.00"), dec("1")).unwrap();
        assert_eq!(split.commission, dec("50.00"));
        assert_eq!(split.affiliate_amount, dec("0"));
    }

    #[test]
    fn rejects_negative_amount() {
        assert!(compute_split(dec("-1"), dec("0.05")).is_err());
    }

    #[test]
    fn rejects_out_of_range_fee_rate() {
        assert!(compute_split(dec("10"), dec("-0.05")).is_err());
        assert!(compute_split(dec("10"), dec("1.01")).is_err());
    }

    #[test]
    fn settlement_clamps_oversized_commission() {
        let split = settlement_split(dec("10.00"), dec("12.00"));
        assert_eq!(split.affiliate_amount, Decimal::ZERO);
    }
}
