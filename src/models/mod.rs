//! Data models for positions, trade records, and pending decisions.

mod pending;
mod position;
mod trade;

pub use pending::{DecisionReason, PendingDecision};
pub use position::Position;
pub use trade::{TradeRecord, TradeSide};
