//! Risk-bearing actions awaiting operator confirmation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// Why a decision was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Entry,
    StopLoss,
    TakeProfit,
    StrategyExit,
    Manual,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Entry => "entry",
            DecisionReason::StopLoss => "stop_loss",
            DecisionReason::TakeProfit => "take_profit",
            DecisionReason::StrategyExit => "strategy_exit",
            DecisionReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed action held until the operator confirms or declines it.
///
/// At most one pending decision may exist per instrument; the decision gate
/// enforces that. A pending decision never expires on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub symbol: String,
    pub side: TradeSide,
    pub price: Decimal,
    pub qty: Decimal,

    /// Proposed protective stop (buys)
    pub stop: Option<Decimal>,

    /// Proposed take-profit target (buys)
    pub take_profit: Option<Decimal>,

    /// Profit that would be realized by executing now (sells)
    pub projected_profit: Option<Decimal>,

    pub reason: DecisionReason,

    /// Message id in the confirmation channel, once the question is sent
    pub correlation_id: Option<i64>,

    pub created_at: DateTime<Utc>,
}

impl PendingDecision {
    pub fn entry(
        symbol: String,
        price: Decimal,
        qty: Decimal,
        stop: Option<Decimal>,
        take_profit: Option<Decimal>,
        reason: DecisionReason,
    ) -> Self {
        Self {
            symbol,
            side: TradeSide::Buy,
            price,
            qty,
            stop,
            take_profit,
            projected_profit: None,
            reason,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn exit(
        symbol: String,
        price: Decimal,
        qty: Decimal,
        projected_profit: Decimal,
        reason: DecisionReason,
    ) -> Self {
        Self {
            symbol,
            side: TradeSide::Sell,
            price,
            qty,
            stop: None,
            take_profit: None,
            projected_profit: Some(projected_profit),
            reason,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }
}
