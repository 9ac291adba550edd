//! Open position in a single instrument.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Open long exposure in one instrument.
///
/// The stop, once set, only ever ratchets upward (toward or above entry);
/// the high-water mark is monotonically non-decreasing for the life of the
/// position. Both invariants are enforced by the mutators below rather than
/// by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol (e.g. "BTCUSDT")
    pub symbol: String,

    /// Quantity held, strictly positive while open
    pub qty: Decimal,

    /// Entry price per unit
    pub entry: Decimal,

    /// Protective stop price, if one has been placed
    pub stop: Option<Decimal>,

    /// Fee-adjusted take-profit target, if computed
    pub take_profit: Option<Decimal>,

    /// Highest price observed since the position opened
    pub high_water: Decimal,

    /// Absolute price gap used to trail the stop below the high-water mark
    pub stop_distance: Decimal,

    /// Row id of the opening trade in the ledger
    pub trade_id: i64,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a new position, validating the structural invariants at creation.
    pub fn open(
        symbol: String,
        qty: Decimal,
        entry: Decimal,
        stop: Option<Decimal>,
        stop_distance: Decimal,
        trade_id: i64,
    ) -> Result<Self> {
        if qty <= Decimal::ZERO {
            bail!("position quantity must be positive, got {qty}");
        }
        if entry <= Decimal::ZERO {
            bail!("entry price must be positive, got {entry}");
        }
        if let Some(stop) = stop {
            if stop >= entry {
                bail!("initial stop {stop} must sit below entry {entry}");
            }
        }

        Ok(Self {
            symbol,
            qty,
            entry,
            stop,
            take_profit: None,
            high_water: entry,
            stop_distance,
            trade_id,
            opened_at: Utc::now(),
        })
    }

    /// Raise the high-water mark. Lower observations are ignored.
    pub fn raise_high_water(&mut self, price: Decimal) -> bool {
        if price > self.high_water {
            self.high_water = price;
            true
        } else {
            false
        }
    }

    /// Raise the stop. A candidate below the current stop is ignored so the
    /// stop never loosens.
    pub fn raise_stop(&mut self, candidate: Decimal) -> bool {
        match self.stop {
            Some(current) if candidate <= current => false,
            _ => {
                self.stop = Some(candidate);
                true
            }
        }
    }

    /// Gross unrealized profit at the given price.
    pub fn unrealized(&self, price: Decimal) -> Decimal {
        (price - self.entry) * self.qty
    }

    /// Gross profit as a percentage of entry.
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry) / self.entry * Decimal::ONE_HUNDRED
    }

    /// Current notional value at the given price.
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.qty * price
    }
}
