//! Trading logic: position sizing, exit management, operator decisions,
//! holdings reconciliation.

mod decision;
mod exits;
mod reconcile;
mod sizer;

pub use decision::{DecisionGate, DecisionOutcome, Resolution};
pub use exits::{ExitController, ExitTrigger};
pub use reconcile::reconcile;
pub use sizer::{size_position, Sizing};
