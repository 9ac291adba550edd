//! Local-book vs exchange-holdings reconciliation.
//!
//! The exchange account is the source of truth for quantities. Run at
//! startup and at the top of every trading cycle; a holdings fetch failure
//! leaves the local book untouched rather than guessing.

use std::collections::HashMap;

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::api::Exchange;
use crate::db::Database;
use crate::models::Position;

/// Quantity differences at or below this are dust, not drift.
const DRIFT_EPS: Decimal = dec!(0.000001);

/// Align local positions with exchange holdings. Positions whose asset the
/// exchange no longer holds are dropped; quantity drift beyond `DRIFT_EPS`
/// is corrected to the exchange's number while entry, stop, and target are
/// kept. Corrections are persisted before returning.
pub async fn reconcile(
    db: &Database,
    exchange: &dyn Exchange,
    positions: &mut HashMap<String, Position>,
    quote_asset: &str,
) -> Result<()> {
    let holdings = match exchange.holdings().await {
        Ok(holdings) => holdings,
        Err(err) => {
            warn!(error = %err, "holdings fetch failed, skipping reconciliation");
            return Ok(());
        }
    };

    let symbols: Vec<String> = positions.keys().cloned().collect();
    for symbol in symbols {
        let base = symbol.strip_suffix(quote_asset).unwrap_or(&symbol);
        let held = holdings.get(base).copied().unwrap_or(Decimal::ZERO);

        let local_qty = positions[&symbol].qty;
        if held <= DRIFT_EPS {
            warn!(symbol = %symbol, local = %local_qty, "exchange holds nothing, dropping position");
            positions.remove(&symbol);
            db.delete_position(&symbol).await?;
            continue;
        }

        let drift = (held - local_qty).abs();
        if drift > DRIFT_EPS {
            warn!(
                symbol = %symbol,
                local = %local_qty,
                exchange = %held,
                "quantity drift, adopting exchange number"
            );
            if let Some(position) = positions.get_mut(&symbol) {
                position.qty = held;
                db.save_position(position).await?;
            }
        }
    }

    Ok(())
}
