//! Immutable trade ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry for one execution. Created at entry with the profit fields
/// unset; they are written exactly once when the position closes and never
/// revised afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,

    /// Realized profit in the settlement currency, set at close
    pub profit: Option<Decimal>,

    /// Realized profit as a percentage of entry, set at close
    pub profit_pct: Option<Decimal>,
}

impl TradeRecord {
    pub fn is_closed(&self) -> bool {
        self.profit.is_some()
    }
}
