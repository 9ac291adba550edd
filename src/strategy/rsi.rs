//! Relative Strength Index strategy.

use crate::config::StrategyParams;
use crate::models::Position;

use super::{headline_blocked, net_pnl_pct, PriceHistory, Strategy};

const PROFIT_EPS: f64 = 1e-6;

/// Classic RSI mean-reversion: enters when the index drops below the
/// oversold line, exits when it climbs above the overbought line and the
/// position is in net profit.
pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
    fee_rate: f64,
    min_pnl_pct: f64,
    bad_words: Vec<String>,
    history: PriceHistory,
}

impl RsiStrategy {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            period: params.rsi_period,
            oversold: params.oversold,
            overbought: params.overbought,
            fee_rate: 0.0,
            min_pnl_pct: params.min_pnl_pct,
            bad_words: params.bad_words.iter().map(|w| w.to_lowercase()).collect(),
            history: PriceHistory::new(params.rsi_period + 1),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// RSI over the last `period` price deltas. None until `period + 1`
    /// samples exist. All losses zero maps to 100.
    fn rsi(&self, symbol: &str) -> Option<f64> {
        let window = self.history.tail(symbol, self.period + 1)?;
        let mut gains = 0.0;
        let mut losses = 0.0;
        for pair in window.windows(2) {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                gains += delta;
            } else {
                losses += -delta;
            }
        }
        if losses == 0.0 {
            return Some(100.0);
        }
        let rs = gains / losses;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn entry_signal(&mut self, symbol: &str, price: f64, headlines: &[String]) -> bool {
        if headline_blocked(headlines, &self.bad_words) {
            return false;
        }

        self.history.push(symbol, price);

        match self.rsi(symbol) {
            Some(rsi) => rsi < self.oversold,
            None => false,
        }
    }

    fn exit_signal(&mut self, symbol: &str, position: &Position, price: f64) -> bool {
        self.history.push(symbol, price);

        let Some(rsi) = self.rsi(symbol) else {
            return false;
        };
        if rsi <= self.overbought {
            return false;
        }
        net_pnl_pct(position, price, self.fee_rate) >= self.min_pnl_pct - PROFIT_EPS
    }

    fn seed_history(&mut self, symbol: &str, prices: &[f64]) {
        self.history.seed(symbol, prices);
    }

    fn history_demand(&self) -> usize {
        self.period + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> RsiStrategy {
        let params = StrategyParams {
            name: "rsi".to_string(),
            rsi_period: 3,
            oversold: 30.0,
            overbought: 70.0,
            min_pnl_pct: 1.0,
            ..StrategyParams::default()
        };
        RsiStrategy::new(&params).with_fee_rate(0.001)
    }

    fn position(entry: f64) -> Position {
        Position::open(
            "ETHUSDT".into(),
            dec!(1),
            rust_decimal::Decimal::try_from(entry).unwrap(),
            None,
            dec!(1),
            1,
        )
        .unwrap()
    }

    #[test]
    fn needs_period_plus_one_samples() {
        let mut s = strategy();
        assert!(!s.entry_signal("ETHUSDT", 100.0, &[]));
        assert!(!s.entry_signal("ETHUSDT", 99.0, &[]));
        assert!(!s.entry_signal("ETHUSDT", 98.0, &[]));
        // Fourth sample fills the window; pure decline gives RSI 0.
        assert!(s.entry_signal("ETHUSDT", 97.0, &[]));
    }

    #[test]
    fn all_gains_reads_one_hundred() {
        let mut s = strategy();
        s.seed_history("ETHUSDT", &[100.0, 101.0, 102.0, 103.0]);
        assert_eq!(s.rsi("ETHUSDT"), Some(100.0));
    }

    #[test]
    fn no_entry_when_overbought() {
        let mut s = strategy();
        s.seed_history("ETHUSDT", &[100.0, 101.0, 102.0]);
        assert!(!s.entry_signal("ETHUSDT", 103.0, &[]));
    }

    #[test]
    fn exit_needs_overbought_and_profit() {
        // Steep rally: RSI 100, well above overbought.
        let mut s = strategy();
        s.seed_history("ETHUSDT", &[100.0, 105.0, 110.0]);

        // Position entered at the top is flat: hold.
        let flat = position(115.0);
        assert!(!s.exit_signal("ETHUSDT", &flat, 115.0));

        // Position entered low is well in profit: take it.
        let mut s = strategy();
        s.seed_history("ETHUSDT", &[100.0, 105.0, 110.0]);
        let winning = position(100.0);
        assert!(s.exit_signal("ETHUSDT", &winning, 115.0));
    }

    #[test]
    fn mixed_tape_rsi_value() {
        let mut s = strategy();
        // Deltas: +2, -1, +2 over period 3: gains 4, losses 1, RSI 80.
        s.seed_history("ETHUSDT", &[10.0, 12.0, 11.0, 13.0]);
        let rsi = s.rsi("ETHUSDT").unwrap();
        assert!((rsi - 80.0).abs() < 1e-9);
    }

    #[test]
    fn bad_news_suppresses_entry() {
        let mut s = strategy();
        s.seed_history("ETHUSDT", &[100.0, 99.0, 98.0]);
        let headlines = vec!["Token issuer hit with class-action lawsuit".to_string()];
        assert!(!s.entry_signal("ETHUSDT", 97.0, &headlines));
    }
}
