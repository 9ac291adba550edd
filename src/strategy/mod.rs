//! Pluggable entry/exit signal strategies.
//!
//! Each strategy owns a bounded per-symbol price history, appended only by
//! the trading-cycle task. Indicator math runs in f64; position money math
//! stays in `Decimal` and crosses the seam via `to_f64` exactly once.

mod ma;
mod rsi;

use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Result};
use rust_decimal::prelude::ToPrimitive;

use crate::config::StrategyParams;
use crate::models::Position;

pub use ma::MovingAverageCross;
pub use rsi::RsiStrategy;

/// Rolling history keeps this many multiples of the longest lookback.
const RETENTION_MULTIPLIER: usize = 10;

/// Entry/exit signal generator.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Should a new position be opened? Appends the price to history.
    fn entry_signal(&mut self, symbol: &str, price: f64, headlines: &[String]) -> bool;

    /// Should the given position be closed? Appends the price to history.
    fn exit_signal(&mut self, symbol: &str, position: &Position, price: f64) -> bool;

    /// Replace a symbol's history with persisted data. Does not count as a
    /// live append; the next observed price lands on top of the seed.
    fn seed_history(&mut self, symbol: &str, prices: &[f64]);

    /// Samples needed before the strategy can produce a signal.
    fn history_demand(&self) -> usize;
}

/// Instantiate the configured strategy by name.
pub fn init_strategy(params: &StrategyParams, fee_rate: f64) -> Result<Box<dyn Strategy>> {
    match params.name.as_str() {
        "ma" => Ok(Box::new(MovingAverageCross::new(params).with_fee_rate(fee_rate))),
        "rsi" => Ok(Box::new(RsiStrategy::new(params).with_fee_rate(fee_rate))),
        other => bail!("unknown strategy '{other}'"),
    }
}

/// True when any headline contains any blocked keyword, case-insensitively.
pub fn headline_blocked(headlines: &[String], bad_words: &[String]) -> bool {
    headlines.iter().any(|h| {
        let lower = h.to_lowercase();
        bad_words.iter().any(|w| lower.contains(w.as_str()))
    })
}

/// Net-of-fees profit percentage relative to the fee-laden entry cost.
pub(crate) fn net_pnl_pct(position: &Position, price: f64, fee_rate: f64) -> f64 {
    let entry = position.entry.to_f64().unwrap_or(0.0);
    let entry_cost = entry * (1.0 + fee_rate);
    if entry_cost <= 0.0 {
        return 0.0;
    }
    let exit_value = price * (1.0 - fee_rate);
    (exit_value - entry_cost) / entry_cost * 100.0
}

/// Bounded oldest-first price series per symbol.
#[derive(Debug, Default)]
pub(crate) struct PriceHistory {
    cap: usize,
    series: HashMap<String, VecDeque<f64>>,
}

impl PriceHistory {
    pub(crate) fn new(longest_window: usize) -> Self {
        Self {
            cap: longest_window.max(1) * RETENTION_MULTIPLIER,
            series: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, symbol: &str, price: f64) {
        let series = self.series.entry(symbol.to_string()).or_default();
        series.push_back(price);
        while series.len() > self.cap {
            series.pop_front();
        }
    }

    pub(crate) fn seed(&mut self, symbol: &str, prices: &[f64]) {
        let start = prices.len().saturating_sub(self.cap);
        self.series
            .insert(symbol.to_string(), prices[start..].iter().copied().collect());
    }

    pub(crate) fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map_or(0, |s| s.len())
    }

    /// Last `window` samples, oldest first. None when history is short.
    pub(crate) fn tail(&self, symbol: &str, window: usize) -> Option<Vec<f64>> {
        let series = self.series.get(symbol)?;
        if series.len() < window {
            return None;
        }
        Some(series.iter().skip(series.len() - window).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_filter_is_case_insensitive() {
        let bad = vec!["hack".to_string(), "lawsuit".to_string()];
        let headlines = vec!["Major Exchange HACKED Overnight".to_string()];
        assert!(headline_blocked(&headlines, &bad));

        let calm = vec!["Market drifts sideways".to_string()];
        assert!(!headline_blocked(&calm, &bad));
        assert!(!headline_blocked(&[], &bad));
    }

    #[test]
    fn factory_rejects_unknown_name() {
        let mut params = StrategyParams::default();
        params.name = "momentum".to_string();
        assert!(init_strategy(&params, 0.001).is_err());

        params.name = "rsi".to_string();
        assert_eq!(init_strategy(&params, 0.001).unwrap().name(), "rsi");
    }

    #[test]
    fn history_is_capped_and_ordered() {
        let mut hist = PriceHistory::new(2); // cap = 20
        for i in 0..50 {
            hist.push("X", i as f64);
        }
        assert_eq!(hist.len("X"), 20);
        let tail = hist.tail("X", 3).unwrap();
        assert_eq!(tail, vec![47.0, 48.0, 49.0]);
    }

    #[test]
    fn seeding_replaces_instead_of_appending() {
        let mut hist = PriceHistory::new(5);
        hist.push("X", 1.0);
        hist.seed("X", &[10.0, 11.0, 12.0]);
        assert_eq!(hist.len("X"), 3);
        assert_eq!(hist.tail("X", 3).unwrap(), vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn oversized_seed_keeps_most_recent() {
        let mut hist = PriceHistory::new(1); // cap = 10
        let prices: Vec<f64> = (0..25).map(|i| i as f64).collect();
        hist.seed("X", &prices);
        assert_eq!(hist.len("X"), 10);
        assert_eq!(hist.tail("X", 1).unwrap(), vec![24.0]);
    }
}
