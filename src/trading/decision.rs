//! Operator decision gate.
//!
//! Every proposed order passes through here. Buys and sufficiently
//! profitable sells execute immediately; everything else is parked as a
//! pending decision until the operator confirms or declines it. At most
//! one decision per symbol may be pending at a time.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::{PendingDecision, TradeSide};

/// What the gate decided for a submitted proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Execute now, no operator involvement needed
    Execute,
    /// Parked; the operator has been asked
    Deferred,
    /// A decision for this symbol is already awaiting the operator
    AlreadyPending,
}

/// Operator verdict on a previously deferred proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Approved(PendingDecision),
    Declined(PendingDecision),
    /// Nothing was pending for the symbol
    Unknown,
}

pub struct DecisionGate {
    pending: RwLock<HashMap<String, PendingDecision>>,

    /// Sells with projected profit at or above this execute without
    /// confirmation. Zero auto-executes every profitable sell.
    auto_threshold: Decimal,
}

impl DecisionGate {
    pub fn new(auto_threshold: Decimal) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            auto_threshold,
        }
    }

    /// Run a proposal through the gate. `Deferred` stores it; the caller is
    /// responsible for notifying the operator.
    pub async fn submit(&self, decision: PendingDecision) -> DecisionOutcome {
        let mut pending = self.pending.write().await;
        if pending.contains_key(&decision.symbol) {
            return DecisionOutcome::AlreadyPending;
        }

        let auto = match decision.side {
            TradeSide::Buy => true,
            TradeSide::Sell => decision
                .projected_profit
                .is_some_and(|p| p >= self.auto_threshold),
        };
        if auto {
            return DecisionOutcome::Execute;
        }

        info!(
            symbol = %decision.symbol,
            reason = %decision.reason,
            projected = ?decision.projected_profit,
            "deferring order to operator"
        );
        pending.insert(decision.symbol.clone(), decision);
        DecisionOutcome::Deferred
    }

    /// Record the operator message id so a later reply can be correlated.
    pub async fn attach_correlation(&self, symbol: &str, message_id: i64) {
        if let Some(decision) = self.pending.write().await.get_mut(symbol) {
            decision.correlation_id = Some(message_id);
        }
    }

    /// Apply the operator's verdict. The pending entry is consumed either
    /// way so the symbol unblocks immediately.
    pub async fn resolve(&self, symbol: &str, approved: bool) -> Resolution {
        let Some(decision) = self.pending.write().await.remove(symbol) else {
            return Resolution::Unknown;
        };
        if approved {
            Resolution::Approved(decision)
        } else {
            info!(symbol = %symbol, "operator declined order");
            Resolution::Declined(decision)
        }
    }

    pub async fn is_pending(&self, symbol: &str) -> bool {
        self.pending.read().await.contains_key(symbol)
    }
}
