//! Risk-based position sizing.
//!
//! Pure math: given a balance, a price, and a risk budget, work out how
//! much to buy and where the protective stop sits. Every rejection is a
//! soft one carrying a human-readable reason; this module never errors.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

/// Quantities are truncated (never rounded up) to this many decimal places.
const QTY_PRECISION: u32 = 6;

/// Outcome of a sizing request. A zero quantity always comes with a reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Sizing {
    pub qty: Decimal,
    pub stop: Option<Decimal>,
    pub rejection: Option<String>,
}

impl Sizing {
    fn reject(reason: String) -> Self {
        debug!(reason = %reason, "sizing rejected");
        Self {
            qty: Decimal::ZERO,
            stop: None,
            rejection: Some(reason),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Size a new long position under a risk budget.
///
/// The amount risked is `balance * risk_fraction`. The per-unit loss if the
/// stop fires includes the round-trip fee cost (entry fee on `price`, exit
/// fee on the stop), so the quantity is what keeps a stopped-out trade
/// within the budget. Notional is capped at `max_notional` and at what the
/// balance can actually cover after the entry fee, then the quantity is
/// truncated to the instrument precision. A truncated trade whose notional
/// falls below `min_notional` is rejected rather than silently shrunk.
///
/// The returned stop is `price - stop_distance`, independent of fees.
#[allow(clippy::too_many_arguments)]
pub fn size_position(
    balance: Decimal,
    price: Decimal,
    risk_fraction: Decimal,
    stop_distance: Decimal,
    min_notional: Decimal,
    max_notional: Decimal,
    fee_rate: Decimal,
) -> Sizing {
    if balance <= Decimal::ZERO {
        return Sizing::reject("balance is zero or negative".to_string());
    }
    if price <= Decimal::ZERO || stop_distance <= Decimal::ZERO {
        return Sizing::reject(format!(
            "invalid inputs (balance={balance}, price={price}, stop_distance={stop_distance})"
        ));
    }
    if stop_distance >= price {
        return Sizing::reject(format!(
            "stop distance {stop_distance} at or above price {price}"
        ));
    }

    let risk_amount = balance * risk_fraction;
    if risk_amount < min_notional {
        return Sizing::reject(format!(
            "risk amount ${risk_amount:.2} below minimum trade ${min_notional:.2}"
        ));
    }

    let stop = price - stop_distance;

    // Per-unit loss when stopped out, fees included on both legs.
    let per_unit_loss = stop_distance + price * fee_rate + stop * fee_rate;
    let raw_qty = risk_amount / per_unit_loss;

    // Cap notional to the configured maximum and to what the balance can
    // cover once the entry fee is paid.
    let affordable = balance / (Decimal::ONE + fee_rate);
    let notional = (raw_qty * price).min(max_notional).min(affordable);
    if notional < min_notional {
        return Sizing::reject(format!(
            "trade value ${notional:.2} below minimum trade ${min_notional:.2}"
        ));
    }

    let qty = (notional / price)
        .round_dp_with_strategy(QTY_PRECISION, RoundingStrategy::ToZero);

    // Re-check the notional with the truncated quantity; reject instead of
    // sizing a trade the venue would refuse.
    let final_notional = qty * price;
    if qty <= Decimal::ZERO || final_notional < min_notional {
        return Sizing::reject(format!(
            "trade value ${final_notional:.2} below minimum after truncation"
        ));
    }

    Sizing {
        qty,
        stop: Some(stop),
        rejection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn size(balance: Decimal, price: Decimal, stop_distance: Decimal) -> Sizing {
        size_position(
            balance,
            price,
            dec!(0.01),
            stop_distance,
            dec!(1.0),
            dec!(100.0),
            dec!(0.001),
        )
    }

    #[test]
    fn sizes_under_risk_budget() {
        // balance=100, price=50, risk 1%, stop distance 1, fee 0.1%
        let s = size(dec!(100), dec!(50), dec!(1));
        assert!(s.rejection.is_none());
        assert_eq!(s.stop, Some(dec!(49)));
        // risk $1 over a per-unit loss of 1 + 0.050 + 0.049 = 1.099
        assert_eq!(s.qty, dec!(0.909918));
    }

    #[test]
    fn rejects_when_risk_below_minimum() {
        let s = size(dec!(5), dec!(50), dec!(1));
        assert_eq!(s.qty, Decimal::ZERO);
        assert_eq!(
            s.rejection.as_deref(),
            Some("risk amount $0.05 below minimum trade $1.00")
        );
    }

    #[test]
    fn rejects_nonpositive_inputs() {
        assert!(size(dec!(0), dec!(50), dec!(1)).is_rejected());
        assert!(size(dec!(100), dec!(0), dec!(1)).is_rejected());
        assert!(size(dec!(100), dec!(50), dec!(0)).is_rejected());
        assert!(size(dec!(100), dec!(50), dec!(60)).is_rejected());
    }

    #[test]
    fn notional_capped_by_balance_after_fees() {
        // Huge risk budget, tiny balance: the cap binds at balance/(1+fee).
        let s = size_position(
            dec!(10),
            dec!(2),
            dec!(1.0),
            dec!(0.5),
            dec!(1.0),
            dec!(1000.0),
            dec!(0.001),
        );
        assert!(s.rejection.is_none());
        assert!(s.qty * dec!(2) <= dec!(10) / dec!(1.001));
    }

    #[test]
    fn quantity_monotone_in_balance() {
        let mut last = Decimal::ZERO;
        for balance in [dec!(100), dec!(200), dec!(400), dec!(800)] {
            let s = size_position(
                balance,
                dec!(50),
                dec!(0.01),
                dec!(1),
                dec!(1.0),
                dec!(1_000_000),
                dec!(0.001),
            );
            assert!(s.qty >= last, "qty shrank as balance grew");
            last = s.qty;
        }
    }

    #[test]
    fn quantity_non_increasing_in_stop_distance() {
        let mut last = Decimal::MAX;
        for sd in [dec!(0.5), dec!(1), dec!(2), dec!(4)] {
            let s = size_position(
                dec!(10000),
                dec!(50),
                dec!(0.01),
                sd,
                dec!(1.0),
                dec!(1_000_000),
                dec!(0.001),
            );
            assert!(s.qty <= last, "qty grew as stop widened");
            last = s.qty;
        }
    }

    #[test]
    fn rejects_dust_after_truncation() {
        // High-priced instrument: the capped notional passes the floor but
        // the quantity truncates to a notional that no longer does.
        let s = size_position(
            dec!(10000),
            dec!(10000000),
            dec!(0.5),
            dec!(1000000),
            dec!(55.0),
            dec!(59.0),
            dec!(0.001),
        );
        assert!(s.is_rejected());
        assert!(s.rejection.unwrap().contains("below minimum after truncation"));
    }
}
