//! Bot configuration: risk parameters, strategy tuning, collaborator
//! endpoints. Defaults can be overridden through the environment (loaded
//! from `.env` by `main`).

use std::env;
use std::str::FromStr;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Where the stop distance for new positions comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    /// Fixed percentage of the entry price
    FixedPct,
    /// Standard deviation of recent prices, floored at the fixed percentage
    Volatility,
}

impl FromStr for StopSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fixed" | "fixed_pct" => Ok(StopSource::FixedPct),
            "volatility" | "vol" => Ok(StopSource::Volatility),
            other => bail!("unknown stop source '{other}'"),
        }
    }
}

/// Risk-budget parameters consumed by the sizer and the exit controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of available balance risked per trade
    pub risk_fraction: Decimal,

    /// Fixed stop distance as a fraction of entry price
    pub stop_pct: Decimal,

    /// How stop distances are derived
    pub stop_source: StopSource,

    /// Ratio of target profit distance to risk distance
    pub reward_multiple: Decimal,

    /// Taker fee per side (e.g. 0.001 for 0.1%)
    pub fee_rate: Decimal,

    /// Minimum net exit profit as a percentage of entry (1.0 = 1%)
    pub min_exit_pct: Decimal,

    /// Minimum notional per trade in the quote currency
    pub min_notional: Decimal,

    /// Maximum notional per trade in the quote currency
    pub max_notional: Decimal,

    /// Projected profit at or above this auto-executes; below it the
    /// operator must confirm
    pub confirm_threshold: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: dec!(0.01),    // risk 1% of balance per trade
            stop_pct: dec!(0.02),         // 2% stop below entry
            stop_source: StopSource::FixedPct,
            reward_multiple: dec!(2.0),
            fee_rate: dec!(0.001),        // 0.1% taker fee
            min_exit_pct: dec!(1.0),      // exits must net at least 1%
            min_notional: dec!(1.0),
            max_notional: dec!(10.0),
            confirm_threshold: Decimal::ZERO,
        }
    }
}

/// Strategy selection and indicator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// "ma" or "rsi"
    pub name: String,

    pub short_window: usize,
    pub long_window: usize,

    pub rsi_period: usize,
    pub oversold: f64,
    pub overbought: f64,

    /// Minimum net-of-fees profit percentage before an indicator exit fires
    pub min_pnl_pct: f64,

    /// Headlines containing any of these suppress entries
    pub bad_words: Vec<String>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            name: "ma".to_string(),
            short_window: 3,
            long_window: 5,
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            min_pnl_pct: 1.0,
            bad_words: [
                "lawsuit",
                "ban",
                "hack",
                "crash",
                "regulation",
                "investigation",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Simulated starting balance, used until the exchange reports one
    pub start_balance: Decimal,

    /// Seconds between trading cycles
    pub cycle_interval_secs: u64,

    /// Place real orders when true; otherwise orders are simulated
    pub live: bool,

    /// Invested capital across open positions may not exceed this fraction
    /// of the starting balance
    pub invest_cap_fraction: Decimal,

    /// New entries per cycle ceiling
    pub max_orders_per_cycle: usize,

    /// Instruments the bot watches
    pub watchlist: Vec<String>,

    /// Settlement currency suffix shared by all watched symbols
    pub quote_asset: String,

    pub database_url: String,

    pub risk: RiskConfig,
    pub strategy: StrategyParams,

    // Collaborator endpoints and credentials
    pub exchange_base_url: String,
    pub exchange_api_key: Option<String>,
    pub ws_url: String,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub news_api_key: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            start_balance: dec!(100.0),
            cycle_interval_secs: 300,
            live: false,
            invest_cap_fraction: dec!(0.20),
            max_orders_per_cycle: 5,
            watchlist: ["BTCUSDT", "ETHUSDT", "XRPUSDT", "SOLUSDT", "DOGEUSDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quote_asset: "USDT".to_string(),
            database_url: "sqlite:trailbot.db?mode=rwc".to_string(),
            risk: RiskConfig::default(),
            strategy: StrategyParams::default(),
            exchange_base_url: "https://api.binance.com".to_string(),
            exchange_api_key: None,
            ws_url: "wss://stream.binance.com:9443".to_string(),
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            news_api_key: "dummy".to_string(),
        }
    }
}

impl BotConfig {
    /// Build a configuration from the environment, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        cfg.start_balance = env_parse("START_BALANCE", cfg.start_balance)?;
        cfg.cycle_interval_secs = env_parse("CYCLE_INTERVAL_SECS", cfg.cycle_interval_secs)?;
        cfg.live = env_parse("LIVE_MODE", cfg.live)?;
        cfg.invest_cap_fraction = env_parse("INVEST_CAP_FRACTION", cfg.invest_cap_fraction)?;
        cfg.max_orders_per_cycle = env_parse("MAX_ORDERS_PER_CYCLE", cfg.max_orders_per_cycle)?;
        cfg.quote_asset = env_string("QUOTE_ASSET", &cfg.quote_asset);
        cfg.database_url = env_string("DATABASE_URL", &cfg.database_url);

        if let Ok(list) = env::var("WATCHLIST") {
            cfg.watchlist = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        cfg.risk.risk_fraction = env_parse("RISK_FRACTION", cfg.risk.risk_fraction)?;
        cfg.risk.stop_pct = env_parse("STOP_LOSS_PCT", cfg.risk.stop_pct)?;
        cfg.risk.stop_source = env_parse("STOP_SOURCE", cfg.risk.stop_source)?;
        cfg.risk.reward_multiple = env_parse("REWARD_MULTIPLE", cfg.risk.reward_multiple)?;
        cfg.risk.fee_rate = env_parse("FEE_RATE", cfg.risk.fee_rate)?;
        cfg.risk.min_exit_pct = env_parse("MIN_EXIT_PCT", cfg.risk.min_exit_pct)?;
        cfg.risk.min_notional = env_parse("MIN_TRADE", cfg.risk.min_notional)?;
        cfg.risk.max_notional = env_parse("MAX_TRADE", cfg.risk.max_notional)?;
        cfg.risk.confirm_threshold = env_parse("CONFIRM_THRESHOLD", cfg.risk.confirm_threshold)?;

        cfg.strategy.name = env_string("STRATEGY_NAME", &cfg.strategy.name).to_lowercase();
        cfg.strategy.min_pnl_pct = env_parse("PROFIT_TARGET_PCT", cfg.strategy.min_pnl_pct)?;

        cfg.exchange_base_url = env_string("EXCHANGE_BASE_URL", &cfg.exchange_base_url);
        cfg.exchange_api_key = env::var("EXCHANGE_API_KEY").ok();
        cfg.ws_url = env_string("EXCHANGE_WS_URL", &cfg.ws_url);
        cfg.telegram_token = env_string("TELEGRAM_TOKEN", &cfg.telegram_token);
        cfg.telegram_chat_id = env_string("TELEGRAM_CHAT_ID", &cfg.telegram_chat_id);
        cfg.news_api_key = env_string("NEWSAPI_KEY", &cfg.news_api_key);

        Ok(cfg)
    }

    /// Ensure credentials needed for a live run are present.
    pub fn require_operator_channel(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.telegram_token.is_empty() {
            missing.push("TELEGRAM_TOKEN");
        }
        if self.telegram_chat_id.is_empty() {
            missing.push("TELEGRAM_CHAT_ID");
        }
        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Hard ceiling on capital invested across open positions.
    pub fn invest_cap(&self) -> Decimal {
        self.start_balance * self.invest_cap_fraction
    }

    /// Base asset for a symbol on this quote currency ("BTCUSDT" -> "BTC").
    pub fn base_asset<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}='{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = BotConfig::default();
        assert!(cfg.risk.risk_fraction > Decimal::ZERO);
        assert!(cfg.risk.min_notional <= cfg.risk.max_notional);
        assert_eq!(cfg.invest_cap(), dec!(20.0));
    }

    #[test]
    fn base_asset_strips_quote_suffix() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.base_asset("BTCUSDT"), "BTC");
        assert_eq!(cfg.base_asset("WEIRD"), "WEIRD");
    }

    #[test]
    fn stop_source_parses() {
        assert_eq!("volatility".parse::<StopSource>().unwrap(), StopSource::Volatility);
        assert_eq!("fixed".parse::<StopSource>().unwrap(), StopSource::FixedPct);
        assert!("kelly".parse::<StopSource>().is_err());
    }
}
