//! Exit controller: trailing stop, break-even promotion, and fee-adjusted
//! take-profit targets.
//!
//! Driven once per cycle per open position with the latest price. Stop and
//! high-water updates are one-way ratchets; the take-profit is recomputed
//! whenever either moves so that hitting it always clears the round-trip
//! fees plus the configured minimum profit.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RiskConfig;
use crate::models::Position;

/// Which exit condition fired, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
    StrategyExit,
}

/// Per-position exit state machine.
pub struct ExitController {
    fee_rate: Decimal,
    reward_multiple: Decimal,
    /// Minimum net exit profit as a percentage of entry (1.0 = 1%)
    min_exit_pct: Decimal,
}

impl ExitController {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            fee_rate: risk.fee_rate,
            reward_multiple: risk.reward_multiple,
            min_exit_pct: risk.min_exit_pct,
        }
    }

    /// Advance the trailing state with the latest price. Returns true when
    /// stop, high-water, or take-profit changed and should be persisted.
    pub fn update(&self, pos: &mut Position, price: Decimal) -> bool {
        let mut changed = false;

        // Trail the stop below a new high-water mark.
        if pos.raise_high_water(price) {
            let trailed = pos.high_water - pos.stop_distance;
            pos.raise_stop(trailed);
            changed = true;
        }

        // Break-even promotion: once the move covers the stop distance,
        // lock in a zero-loss floor. One-way; the trailing ratchet can
        // only lift the stop further.
        if price - pos.entry >= pos.stop_distance
            && pos.stop.map_or(true, |s| s < pos.entry)
        {
            pos.raise_stop(pos.entry);
            changed = true;
        }

        if changed {
            let stop = pos.stop.unwrap_or(pos.entry - pos.stop_distance);
            let target = self.take_profit_for(pos.entry, stop, pos.high_water);
            pos.take_profit = Some(target);
            debug!(
                symbol = %pos.symbol,
                stop = %stop,
                high_water = %pos.high_water,
                take_profit = %target,
                "exit levels updated"
            );
        }

        changed
    }

    /// Check the price-driven exit triggers in priority order. The
    /// strategy-exit trigger is the orchestrator's to add; it ranks below
    /// both price triggers.
    pub fn trigger(&self, pos: &Position, price: Decimal) -> Option<ExitTrigger> {
        if let Some(stop) = pos.stop {
            if price <= stop {
                return Some(ExitTrigger::StopLoss);
            }
        }
        if let Some(tp) = pos.take_profit {
            if price >= tp {
                return Some(ExitTrigger::TakeProfit);
            }
        }
        None
    }

    /// Take-profit target that nets, after round-trip fees, at least the
    /// larger of risk-distance x reward multiple and the minimum exit
    /// percentage of entry.
    pub fn take_profit_for(
        &self,
        entry: Decimal,
        stop: Decimal,
        high_water: Decimal,
    ) -> Decimal {
        let one = Decimal::ONE;
        let entry_cost = entry * (one + self.fee_rate);
        let stop_value = stop * (one - self.fee_rate);
        let risk_after_fees = (entry_cost - stop_value).max(Decimal::ZERO);

        let required_profit = (risk_after_fees * self.reward_multiple)
            .max(entry * self.min_exit_pct / Decimal::ONE_HUNDRED);

        let base_target = entry + (high_water - stop) * self.reward_multiple;
        let base_net = base_target * (one - self.fee_rate) - entry_cost;

        if base_net < required_profit {
            (entry_cost + required_profit) / (one - self.fee_rate)
        } else {
            base_target
        }
    }
}
