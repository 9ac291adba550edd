//! Moving-average crossover strategy.

use crate::config::StrategyParams;
use crate::models::Position;

use super::{headline_blocked, net_pnl_pct, PriceHistory, Strategy};

/// Enters when the short simple average rises above the long one; exits on
/// the downward cross, but only once the position clears fees plus the
/// minimum profit percentage. Negative headlines veto entries.
pub struct MovingAverageCross {
    short_window: usize,
    long_window: usize,
    fee_rate: f64,
    min_pnl_pct: f64,
    bad_words: Vec<String>,
    history: PriceHistory,
}

impl MovingAverageCross {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            short_window: params.short_window,
            long_window: params.long_window,
            fee_rate: 0.0,
            min_pnl_pct: params.min_pnl_pct,
            bad_words: params.bad_words.iter().map(|w| w.to_lowercase()).collect(),
            history: PriceHistory::new(params.long_window),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    fn averages(&self, symbol: &str) -> Option<(f64, f64)> {
        let long = self.history.tail(symbol, self.long_window)?;
        let short_slice = &long[long.len() - self.short_window..];
        let short = short_slice.iter().sum::<f64>() / self.short_window as f64;
        let long_avg = long.iter().sum::<f64>() / self.long_window as f64;
        Some((short, long_avg))
    }
}

impl Strategy for MovingAverageCross {
    fn name(&self) -> &'static str {
        "ma"
    }

    fn entry_signal(&mut self, symbol: &str, price: f64, headlines: &[String]) -> bool {
        if headline_blocked(headlines, &self.bad_words) {
            return false;
        }

        self.history.push(symbol, price);

        // Not enough data yet; wait for sufficient history.
        match self.averages(symbol) {
            Some((short, long)) => short > long,
            None => false,
        }
    }

    fn exit_signal(&mut self, symbol: &str, position: &Position, price: f64) -> bool {
        self.history.push(symbol, price);

        let Some((short, long)) = self.averages(symbol) else {
            return false;
        };
        if short >= long {
            return false;
        }
        net_pnl_pct(position, price, self.fee_rate) > self.min_pnl_pct
    }

    fn seed_history(&mut self, symbol: &str, prices: &[f64]) {
        self.history.seed(symbol, prices);
    }

    fn history_demand(&self) -> usize {
        self.long_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> MovingAverageCross {
        let params = StrategyParams {
            short_window: 3,
            long_window: 5,
            min_pnl_pct: 1.0,
            ..StrategyParams::default()
        };
        MovingAverageCross::new(&params).with_fee_rate(0.001)
    }

    fn position(entry: f64) -> Position {
        Position::open(
            "BTCUSDT".into(),
            dec!(1),
            rust_decimal::Decimal::try_from(entry).unwrap(),
            None,
            dec!(1),
            1,
        )
        .unwrap()
    }

    #[test]
    fn no_entry_without_history() {
        let mut s = strategy();
        for price in [10.0, 10.5, 11.0, 11.5] {
            assert!(!s.entry_signal("BTCUSDT", price, &[]));
        }
    }

    #[test]
    fn enters_on_upward_cross() {
        let mut s = strategy();
        // Rising series: short MA sits above long MA once history fills.
        let mut fired = false;
        for price in [10.0, 10.0, 10.0, 11.0, 12.0, 13.0] {
            fired = s.entry_signal("BTCUSDT", price, &[]);
        }
        assert!(fired);
    }

    #[test]
    fn bad_news_suppresses_entry() {
        let mut s = strategy();
        s.seed_history("BTCUSDT", &[10.0, 10.0, 10.0, 11.0, 12.0]);
        let headlines = vec!["Regulator opens investigation".to_string()];
        assert!(!s.entry_signal("BTCUSDT", 13.0, &headlines));
        // Same tape without the headline fires.
        let mut s = strategy();
        s.seed_history("BTCUSDT", &[10.0, 10.0, 10.0, 11.0, 12.0]);
        assert!(s.entry_signal("BTCUSDT", 13.0, &[]));
    }

    #[test]
    fn exit_requires_cross_and_profit() {
        let mut s = strategy();
        // Falling tape: short MA below long MA.
        s.seed_history("BTCUSDT", &[15.0, 14.0, 13.0, 12.0, 11.0]);

        // Crossed down but the position is under water: hold.
        let losing = position(12.0);
        assert!(!s.exit_signal("BTCUSDT", &losing, 10.5));

        // Crossed down and comfortably in profit: exit.
        let mut s = strategy();
        s.seed_history("BTCUSDT", &[15.0, 14.0, 13.0, 12.0, 11.0]);
        let winning = position(8.0);
        assert!(s.exit_signal("BTCUSDT", &winning, 10.5));
    }

    #[test]
    fn seeding_enables_first_cycle_signal() {
        let mut s = strategy();
        s.seed_history("BTCUSDT", &[10.0, 10.0, 10.0, 11.0, 12.0]);
        // One live append is enough because the seed filled the window.
        assert!(s.entry_signal("BTCUSDT", 13.0, &[]));
    }
}
