//! Bot runner: trading cycle orchestration with full state management.
//!
//! Handles:
//! - Periodic per-symbol trading cycles (exits first, then entries)
//! - Routing every order through the operator decision gate
//! - Long-polling the operator channel for commands
//! - Reconciling the local book against exchange holdings
//! - Persisting state for crash recovery

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use statrs::statistics::Statistics;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, Messenger, NewsClient, OperatorCommand, RestExchange};
use crate::config::{BotConfig, StopSource};
use crate::db::Database;
use crate::feed::{spawn_feed, PriceCache};
use crate::models::{DecisionReason, PendingDecision, Position, TradeSide};
use crate::strategy::{init_strategy, Strategy};
use crate::trading::{
    reconcile, size_position, DecisionGate, DecisionOutcome, ExitController, ExitTrigger,
    Resolution,
};

/// Quantities below this are treated as fully closed.
const QTY_EPS: Decimal = dec!(0.000001);

/// Price samples consulted for volatility-derived stop distances.
const VOLATILITY_WINDOW: i64 = 20;

/// Closed trades averaged in the cycle summary.
const SUMMARY_TRADES: i64 = 10;

/// Account balances tracked in the quote currency.
#[derive(Debug, Clone, Copy)]
struct Balance {
    /// Spendable quote currency
    liquid: Decimal,
    /// Liquid plus marked-to-market positions
    total: Decimal,
}

/// Shared core: everything both the cycle task and the operator task touch.
pub struct Engine {
    config: BotConfig,
    db: Database,
    exchange: Arc<dyn Exchange>,
    messenger: Messenger,
    news: NewsClient,
    cache: PriceCache,
    decisions: DecisionGate,
    exits: ExitController,

    positions: RwLock<HashMap<String, Position>>,
    balance: RwLock<Balance>,
}

impl Engine {
    pub fn new(
        config: BotConfig,
        db: Database,
        exchange: Arc<dyn Exchange>,
        messenger: Messenger,
        news: NewsClient,
        cache: PriceCache,
    ) -> Self {
        let decisions = DecisionGate::new(config.risk.confirm_threshold);
        let exits = ExitController::new(&config.risk);
        let start = config.start_balance;

        Self {
            config,
            db,
            exchange,
            messenger,
            news,
            cache,
            decisions,
            exits,
            positions: RwLock::new(HashMap::new()),
            balance: RwLock::new(Balance {
                liquid: start,
                total: start,
            }),
        }
    }

    pub async fn open_positions(&self) -> HashMap<String, Position> {
        self.positions.read().await.clone()
    }

    /// Latest price for a symbol: stream cache first, REST fallback.
    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(price) = self.cache.get(symbol).await {
            return Ok(price);
        }
        let price = self.exchange.price(symbol).await?;
        self.cache.set(symbol, price).await;
        Ok(price)
    }

    /// Stop distance for a prospective entry at `price`. The volatility
    /// source needs enough persisted samples and never comes out tighter
    /// than the fixed percentage floor.
    async fn stop_distance(&self, symbol: &str, price: Decimal) -> Decimal {
        let fixed = price * self.config.risk.stop_pct;
        if self.config.risk.stop_source == StopSource::FixedPct {
            return fixed;
        }

        let history = match self.db.price_history(symbol, VOLATILITY_WINDOW).await {
            Ok(history) if history.len() >= VOLATILITY_WINDOW as usize => history,
            _ => return fixed,
        };
        let sd = history.std_dev();
        match Decimal::from_f64(sd) {
            Some(sd) if sd > fixed => sd,
            _ => fixed,
        }
    }

    /// Net realized profit if `qty` were sold now at `price`.
    fn projected_profit(&self, position: &Position, qty: Decimal, price: Decimal) -> Decimal {
        let fee = self.config.risk.fee_rate;
        let proceeds = qty * price * (Decimal::ONE - fee);
        let cost = qty * position.entry * (Decimal::ONE + fee);
        proceeds - cost
    }

    // ==================== Execution ====================

    async fn execute_entry(&self, decision: &PendingDecision) -> Result<()> {
        let receipt = self
            .exchange
            .place_order(&decision.symbol, TradeSide::Buy, decision.qty)
            .await?;
        let trade_id = self
            .db
            .record_trade(&decision.symbol, TradeSide::Buy, decision.qty, decision.price)
            .await?;

        let stop_distance = match decision.stop {
            Some(stop) => decision.price - stop,
            None => decision.price * self.config.risk.stop_pct,
        };
        let mut position = Position::open(
            decision.symbol.clone(),
            decision.qty,
            decision.price,
            decision.stop,
            stop_distance,
            trade_id,
        )?;
        position.take_profit = decision.take_profit;

        self.db.save_position(&position).await?;
        self.positions
            .write()
            .await
            .insert(decision.symbol.clone(), position);

        let cost = decision.qty * decision.price * (Decimal::ONE + self.config.risk.fee_rate);
        {
            let mut balance = self.balance.write().await;
            balance.liquid -= cost;
            self.db.save_balance(balance.liquid, balance.total).await?;
        }

        info!(
            symbol = %decision.symbol,
            qty = %decision.qty,
            price = %decision.price,
            order_id = %receipt.client_order_id,
            simulated = receipt.simulated,
            "position opened"
        );
        self.messenger
            .notify(&format!(
                "Opened {} {} @ {} (stop {}, target {})",
                decision.qty,
                decision.symbol,
                decision.price,
                decision
                    .stop
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
                decision
                    .take_profit
                    .map_or_else(|| "-".to_string(), |t| t.to_string()),
            ))
            .await;
        Ok(())
    }

    async fn execute_exit(&self, decision: &PendingDecision) -> Result<()> {
        let Some(position) = self.positions.read().await.get(&decision.symbol).cloned() else {
            warn!(symbol = %decision.symbol, "exit requested for unknown position");
            return Ok(());
        };
        let qty = decision.qty.min(position.qty);
        if qty <= Decimal::ZERO {
            return Ok(());
        }

        // Execute at the freshest price available, not the proposal price.
        let price = self
            .latest_price(&decision.symbol)
            .await
            .unwrap_or(decision.price);

        let receipt = self
            .exchange
            .place_order(&decision.symbol, TradeSide::Sell, qty)
            .await?;
        self.db
            .record_trade(&decision.symbol, TradeSide::Sell, qty, price)
            .await?;

        let fee = self.config.risk.fee_rate;
        let proceeds = qty * price * (Decimal::ONE - fee);
        let cost = qty * position.entry * (Decimal::ONE + fee);
        let profit = proceeds - cost;
        let profit_pct = if cost > Decimal::ZERO {
            profit / cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let remaining = position.qty - qty;
        if remaining <= QTY_EPS {
            self.db
                .close_trade(position.trade_id, profit, profit_pct)
                .await?;
            self.db.delete_position(&decision.symbol).await?;
            self.positions.write().await.remove(&decision.symbol);
        } else {
            let mut positions = self.positions.write().await;
            if let Some(held) = positions.get_mut(&decision.symbol) {
                held.qty = remaining;
                self.db.save_position(held).await?;
            }
        }

        {
            let mut balance = self.balance.write().await;
            balance.liquid += proceeds;
            self.db.save_balance(balance.liquid, balance.total).await?;
        }

        info!(
            symbol = %decision.symbol,
            qty = %qty,
            price = %price,
            profit = %profit,
            reason = %decision.reason,
            order_id = %receipt.client_order_id,
            "position closed"
        );
        self.messenger
            .notify(&format!(
                "Sold {} {} @ {} ({}): profit {} ({:.2}%)",
                qty,
                decision.symbol,
                price,
                decision.reason,
                profit.round_dp(4),
                profit_pct.to_f64().unwrap_or(0.0),
            ))
            .await;
        Ok(())
    }

    /// Push a proposal through the decision gate and run it if it clears.
    async fn submit_and_run(&self, decision: PendingDecision) -> Result<()> {
        let symbol = decision.symbol.clone();
        match self.decisions.submit(decision.clone()).await {
            DecisionOutcome::Execute => match decision.side {
                TradeSide::Buy => self.execute_entry(&decision).await,
                TradeSide::Sell => self.execute_exit(&decision).await,
            },
            DecisionOutcome::Deferred => {
                let question = format!(
                    "Confirm SELL {} {} @ {} ({})? Projected profit: {}. \
                     Reply CONFIRM {} or DECLINE {}.",
                    decision.qty,
                    symbol,
                    decision.price,
                    decision.reason,
                    decision
                        .projected_profit
                        .map_or_else(|| "-".to_string(), |p| p.round_dp(4).to_string()),
                    symbol,
                    symbol,
                );
                if let Some(message_id) = self.messenger.ask_confirmation(&question).await {
                    self.decisions.attach_correlation(&symbol, message_id).await;
                }
                Ok(())
            }
            DecisionOutcome::AlreadyPending => {
                debug!(symbol = %symbol, "decision already pending, skipping");
                Ok(())
            }
        }
    }

    /// Apply an operator verdict to a deferred decision.
    async fn resolve(&self, symbol: &str, approved: bool) -> Result<()> {
        match self.decisions.resolve(symbol, approved).await {
            Resolution::Approved(decision) => match decision.side {
                TradeSide::Buy => self.execute_entry(&decision).await,
                TradeSide::Sell => self.execute_exit(&decision).await,
            },
            Resolution::Declined(_) => {
                self.messenger
                    .notify(&format!("Declined, holding {symbol}."))
                    .await;
                Ok(())
            }
            Resolution::Unknown => {
                self.messenger
                    .notify(&format!("Nothing pending for {symbol}."))
                    .await;
                Ok(())
            }
        }
    }

    // ==================== Operator commands ====================

    pub async fn handle_command(&self, command: OperatorCommand) -> Result<()> {
        match command {
            OperatorCommand::Buy { symbol, qty } => {
                if self.positions.read().await.contains_key(&symbol) {
                    self.messenger
                        .notify(&format!("Already holding {symbol}."))
                        .await;
                    return Ok(());
                }
                let price = self.latest_price(&symbol).await?;
                let notional = qty * price;
                if notional < self.config.risk.min_notional {
                    self.messenger
                        .notify(&format!(
                            "Order too small: {} is below the {} minimum.",
                            notional.round_dp(4),
                            self.config.risk.min_notional,
                        ))
                        .await;
                    return Ok(());
                }
                let cost = notional * (Decimal::ONE + self.config.risk.fee_rate);
                let liquid = self.balance.read().await.liquid;
                if cost > liquid {
                    self.messenger
                        .notify(&format!(
                            "Insufficient balance: {} costs {} but only {} is available.",
                            symbol,
                            cost.round_dp(4),
                            liquid.round_dp(4),
                        ))
                        .await;
                    return Ok(());
                }
                let stop_distance = self.stop_distance(&symbol, price).await;
                let stop = price - stop_distance;
                let target = self.exits.take_profit_for(price, stop, price);
                self.submit_and_run(PendingDecision::entry(
                    symbol,
                    price,
                    qty,
                    Some(stop),
                    Some(target),
                    DecisionReason::Manual,
                ))
                .await
            }
            OperatorCommand::Sell { symbol, qty } => {
                let Some(position) = self.positions.read().await.get(&symbol).cloned() else {
                    self.messenger
                        .notify(&format!("No open position in {symbol}."))
                        .await;
                    return Ok(());
                };
                let price = self.latest_price(&symbol).await?;
                let qty = qty.min(position.qty);
                let projected = self.projected_profit(&position, qty, price);
                self.submit_and_run(PendingDecision::exit(
                    symbol,
                    price,
                    qty,
                    projected,
                    DecisionReason::Manual,
                ))
                .await
            }
            OperatorCommand::Confirm { symbol } => self.resolve(&symbol, true).await,
            OperatorCommand::Decline { symbol } => self.resolve(&symbol, false).await,
            OperatorCommand::Help => {
                self.messenger.notify(Messenger::help_text()).await;
                Ok(())
            }
        }
    }

    /// Long-poll the operator channel until shutdown.
    pub async fn operator_loop(&self, shutdown: Arc<AtomicBool>) {
        let mut offset = 0i64;
        while !shutdown.load(Ordering::SeqCst) {
            match self.messenger.poll_updates(offset).await {
                Ok((commands, next_offset)) => {
                    offset = next_offset;
                    for command in commands {
                        if let Err(err) = self.handle_command(command).await {
                            warn!(error = %err, "operator command failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "operator poll failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    // ==================== Trading cycle ====================

    /// Pull the spendable balance from the exchange; in simulation, on
    /// failure, or on a non-positive report the locally tracked number stands.
    async fn refresh_liquid(&self) {
        if !self.config.live {
            return;
        }
        match self.exchange.balance(&self.config.quote_asset).await {
            Ok(liquid) if liquid > Decimal::ZERO => {
                self.balance.write().await.liquid = liquid
            }
            Ok(liquid) => {
                warn!(%liquid, "exchange reported non-positive balance, keeping tracked balance")
            }
            Err(err) => {
                warn!(error = %err, "balance fetch failed, keeping tracked balance")
            }
        }
    }

    /// Mark open positions to the latest prices and refresh the total.
    async fn refresh_total(&self) -> Result<Balance> {
        let positions = self.positions.read().await.clone();
        let mut marked = Decimal::ZERO;
        for position in positions.values() {
            let price = match self.latest_price(&position.symbol).await {
                Ok(price) => price,
                Err(_) => position.entry,
            };
            marked += position.notional(price);
        }

        let mut balance = self.balance.write().await;
        balance.total = balance.liquid + marked;
        self.db.save_balance(balance.liquid, balance.total).await?;
        Ok(*balance)
    }

    /// Quote currency committed to open positions, marked to current prices.
    async fn invested(&self) -> Decimal {
        let positions = self.positions.read().await.clone();
        let mut committed = Decimal::ZERO;
        for position in positions.values() {
            let price = match self.latest_price(&position.symbol).await {
                Ok(price) => price,
                Err(_) => position.entry,
            };
            committed += position.notional(price);
        }
        committed
    }

    /// Drive exits for one held symbol. Returns true when the position was
    /// proposed for closing.
    async fn run_exits(
        &self,
        strategy: &mut dyn Strategy,
        symbol: &str,
        price: Decimal,
    ) -> Result<bool> {
        let Some(mut position) = self.positions.read().await.get(symbol).cloned() else {
            return Ok(false);
        };

        if self.exits.update(&mut position, price) {
            self.db.save_position(&position).await?;
            self.positions
                .write()
                .await
                .insert(symbol.to_string(), position.clone());
        }

        // The strategy sees every cycle's price even when a price trigger
        // preempts its verdict, so its history never gaps.
        let wants_out = strategy.exit_signal(symbol, &position, price.to_f64().unwrap_or(0.0));

        let trigger = match self.exits.trigger(&position, price) {
            Some(trigger) => Some(trigger),
            None if wants_out => Some(ExitTrigger::StrategyExit),
            None => None,
        };
        let Some(trigger) = trigger else {
            return Ok(false);
        };

        let reason = match trigger {
            ExitTrigger::StopLoss => DecisionReason::StopLoss,
            ExitTrigger::TakeProfit => DecisionReason::TakeProfit,
            ExitTrigger::StrategyExit => DecisionReason::StrategyExit,
        };
        let projected = self.projected_profit(&position, position.qty, price);
        self.submit_and_run(PendingDecision::exit(
            symbol.to_string(),
            price,
            position.qty,
            projected,
            reason,
        ))
        .await?;
        Ok(true)
    }

    /// Consider opening a position in one unheld symbol. Returns true when
    /// an entry was proposed.
    async fn run_entry(
        &self,
        strategy: &mut dyn Strategy,
        symbol: &str,
        price: Decimal,
    ) -> Result<bool> {
        let base = self.config.base_asset(symbol);
        let headlines = self.news.headlines(base).await;
        if !strategy.entry_signal(symbol, price.to_f64().unwrap_or(0.0), &headlines) {
            return Ok(false);
        }

        let remaining_cap = self.config.invest_cap() - self.invested().await;
        if remaining_cap <= Decimal::ZERO {
            debug!(symbol = %symbol, "investment cap reached, skipping entry");
            return Ok(false);
        }
        let max_trade = remaining_cap.min(self.config.risk.max_notional);

        let stop_distance = self.stop_distance(symbol, price).await;
        let liquid = self.balance.read().await.liquid;
        let sizing = size_position(
            liquid,
            price,
            self.config.risk.risk_fraction,
            stop_distance,
            self.config.risk.min_notional,
            max_trade,
            self.config.risk.fee_rate,
        );
        if let Some(reason) = sizing.rejection {
            info!(symbol = %symbol, reason = %reason, "entry signal not sized");
            return Ok(false);
        }

        let stop = sizing.stop.unwrap_or(price - stop_distance);
        let target = self.exits.take_profit_for(price, stop, price);
        self.submit_and_run(PendingDecision::entry(
            symbol.to_string(),
            price,
            sizing.qty,
            Some(stop),
            Some(target),
            DecisionReason::Entry,
        ))
        .await?;
        Ok(true)
    }

    /// One full trading cycle over the watchlist.
    pub async fn run_cycle(&self, strategy: &mut dyn Strategy) -> Result<()> {
        debug!("trading cycle start");
        self.refresh_liquid().await;

        {
            let mut positions = self.positions.write().await;
            reconcile(
                &self.db,
                self.exchange.as_ref(),
                &mut positions,
                &self.config.quote_asset,
            )
            .await?;
        }

        let mut entries = 0usize;
        for symbol in &self.config.watchlist {
            let price = match self.latest_price(symbol).await {
                Ok(price) => price,
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "price unavailable, skipping symbol");
                    continue;
                }
            };
            self.db.save_price(symbol, price).await?;

            let held = self.positions.read().await.contains_key(symbol);
            if held {
                self.run_exits(strategy, symbol, price).await?;
                continue;
            }

            if self.decisions.is_pending(symbol).await {
                continue;
            }
            if entries >= self.config.max_orders_per_cycle {
                continue;
            }
            if self.run_entry(strategy, symbol, price).await? {
                entries += 1;
            }
        }

        let balance = self.refresh_total().await?;
        let open = self.positions.read().await.len();
        let avg = self.db.average_profit_pct(SUMMARY_TRADES).await?;
        info!(
            liquid = %balance.liquid,
            total = %balance.total,
            positions = open,
            "trading cycle complete"
        );
        self.messenger
            .notify(&format!(
                "Cycle done. Total {} (liquid {}), {} open position(s), avg profit last {} trades: {}",
                balance.total.round_dp(2),
                balance.liquid.round_dp(2),
                open,
                SUMMARY_TRADES,
                avg.map_or_else(|| "n/a".to_string(), |a| format!("{:.2}%", a.to_f64().unwrap_or(0.0))),
            ))
            .await;
        Ok(())
    }
}

/// Main bot runner: owns the strategy and drives the engine.
pub struct Bot {
    config: BotConfig,
    engine: Arc<Engine>,
    strategy: Box<dyn Strategy>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub async fn new(config: BotConfig) -> Result<Self> {
        config.require_operator_channel()?;

        let db = Database::new(&config.database_url).await?;
        let exchange: Arc<dyn Exchange> = Arc::new(RestExchange::new(
            config.exchange_base_url.clone(),
            config.exchange_api_key.clone(),
            config.live,
        )?);
        let messenger = Messenger::new(
            config.telegram_token.clone(),
            config.telegram_chat_id.clone(),
        )?;
        let news = NewsClient::new(config.news_api_key.clone())?;
        let cache = PriceCache::new();

        let fee = config.risk.fee_rate.to_f64().unwrap_or(0.0);
        let strategy = init_strategy(&config.strategy, fee)?;
        let engine = Arc::new(Engine::new(config.clone(), db, exchange, messenger, news, cache));

        Ok(Self {
            config,
            engine,
            strategy,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Restore persisted state and warm up the strategy.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("initializing bot");

        let positions = self.engine.db.load_positions().await?;
        if !positions.is_empty() {
            info!(count = positions.len(), "restored open positions");
        }
        *self.engine.positions.write().await = positions;

        if let Some((liquid, total)) = self.engine.db.load_balance().await? {
            info!(%liquid, %total, "resuming from persisted balance");
            *self.engine.balance.write().await = Balance { liquid, total };
        }

        {
            let mut positions = self.engine.positions.write().await;
            reconcile(
                &self.engine.db,
                self.engine.exchange.as_ref(),
                &mut positions,
                &self.config.quote_asset,
            )
            .await?;
        }

        // Warm the strategy from persisted prices, falling back to candles
        // so signals can fire on the first cycle after a cold start.
        let demand = self.strategy.history_demand();
        for symbol in &self.config.watchlist {
            let mut history = self.engine.db.price_history(symbol, demand as i64).await?;
            if history.len() < demand {
                match self.engine.exchange.candles(symbol, demand).await {
                    Ok(candles) if candles.len() >= demand => history = candles,
                    Ok(_) => debug!(symbol = %symbol, "not enough candles to warm up"),
                    Err(err) => warn!(symbol = %symbol, error = %err, "candle fetch failed"),
                }
            }
            if !history.is_empty() {
                self.strategy.seed_history(symbol, &history);
            }
        }

        spawn_feed(
            self.config.ws_url.clone(),
            self.config.watchlist.clone(),
            self.engine.cache.clone(),
        );

        info!(
            watchlist = self.config.watchlist.len(),
            live = self.config.live,
            strategy = self.strategy.name(),
            "bot initialized"
        );
        Ok(())
    }

    /// Main run loop. Blocks until Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval = self.config.cycle_interval_secs,
            "starting bot run loop"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let operator_engine = self.engine.clone();
        let operator_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            operator_engine.operator_loop(operator_shutdown).await;
        });

        let mut cycle = interval(Duration::from_secs(self.config.cycle_interval_secs));
        while !self.shutdown.load(Ordering::SeqCst) {
            cycle.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = self.engine.run_cycle(self.strategy.as_mut()).await {
                error!(error = %err, "trading cycle failed");
                self.engine
                    .messenger
                    .notify(&format!("Cycle failed: {err}. Retrying next interval."))
                    .await;
            }
        }

        self.engine
            .messenger
            .notify("Bot shutting down.")
            .await;
        info!("bot stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OrderReceipt;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedExchange {
        prices: HashMap<String, Decimal>,
        holdings: HashMap<String, Decimal>,
        balance: Option<Decimal>,
        orders: Mutex<Vec<(String, TradeSide, Decimal)>>,
    }

    impl ScriptedExchange {
        fn new() -> Self {
            Self {
                prices: HashMap::new(),
                holdings: HashMap::new(),
                balance: None,
                orders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn balance(&self, _asset: &str) -> Result<Decimal> {
            match self.balance {
                Some(balance) => Ok(balance),
                None => bail!("not scripted"),
            }
        }

        async fn price(&self, symbol: &str) -> Result<Decimal> {
            self.prices
                .get(symbol)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no price for {symbol}"))
        }

        async fn candles(&self, _symbol: &str, _limit: usize) -> Result<Vec<f64>> {
            Ok(Vec::new())
        }

        async fn place_order(
            &self,
            symbol: &str,
            side: TradeSide,
            qty: Decimal,
        ) -> Result<OrderReceipt> {
            self.orders
                .lock()
                .unwrap()
                .push((symbol.to_string(), side, qty));
            Ok(OrderReceipt {
                client_order_id: "test-order".to_string(),
                simulated: true,
            })
        }

        async fn holdings(&self) -> Result<HashMap<String, Decimal>> {
            Ok(self.holdings.clone())
        }
    }

    async fn engine_with(exchange: ScriptedExchange) -> (Arc<Engine>, Arc<ScriptedExchange>) {
        engine_with_config(BotConfig::default(), exchange).await
    }

    async fn engine_with_config(
        config: BotConfig,
        exchange: ScriptedExchange,
    ) -> (Arc<Engine>, Arc<ScriptedExchange>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let exchange = Arc::new(exchange);
        // Unroutable operator endpoint: notifications fail fast and are
        // swallowed, which is exactly the production degradation path.
        let messenger = Messenger::new("t".to_string(), "1".to_string())
            .unwrap()
            .with_base_url("http://127.0.0.1:1".to_string());
        let news = NewsClient::new("k".to_string()).unwrap();
        let engine = Engine::new(
            config,
            db,
            exchange.clone(),
            messenger,
            news,
            PriceCache::new(),
        );
        (Arc::new(engine), exchange)
    }

    fn entry_decision(symbol: &str, price: Decimal, qty: Decimal) -> PendingDecision {
        PendingDecision::entry(
            symbol.to_string(),
            price,
            qty,
            Some(price * dec!(0.98)),
            Some(price * dec!(1.04)),
            DecisionReason::Entry,
        )
    }

    #[tokio::test]
    async fn entry_opens_position_and_debits_balance() {
        let (engine, exchange) = engine_with(ScriptedExchange::new()).await;
        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();

        let positions = engine.open_positions().await;
        assert_eq!(positions["BTCUSDT"].qty, dec!(1));
        assert_eq!(positions["BTCUSDT"].stop, Some(dec!(49)));
        // 100 start minus 50 * 1.001.
        assert_eq!(engine.balance.read().await.liquid, dec!(49.95));
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
        // Persisted for crash recovery.
        assert_eq!(engine.db.load_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_exit_closes_ledger_and_credits_balance() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(60));
        let (engine, _) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();
        engine
            .execute_exit(&PendingDecision::exit(
                "BTCUSDT".to_string(),
                dec!(60),
                dec!(1),
                dec!(0),
                DecisionReason::TakeProfit,
            ))
            .await
            .unwrap();

        assert!(engine.open_positions().await.is_empty());
        assert!(engine.db.load_positions().await.unwrap().is_empty());

        // Entry trade carries the realized profit exactly once.
        let trades = engine.db.recent_trades(10).await.unwrap();
        let entry = trades.iter().find(|t| t.side == TradeSide::Buy).unwrap();
        // 60 * 0.999 - 50 * 1.001 = 9.89
        assert_eq!(entry.profit, Some(dec!(9.89)));

        // 100 - 50.05 + 59.94.
        assert_eq!(engine.balance.read().await.liquid, dec!(109.89));
    }

    #[tokio::test]
    async fn losing_strategy_exit_waits_for_the_operator() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(45));
        exchange.holdings.insert("BTC".to_string(), dec!(1));
        let (engine, exchange) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();
        let orders_before = exchange.orders.lock().unwrap().len();

        let position = engine.open_positions().await["BTCUSDT"].clone();
        let projected = engine.projected_profit(&position, position.qty, dec!(45));
        assert!(projected < Decimal::ZERO);

        engine
            .submit_and_run(PendingDecision::exit(
                "BTCUSDT".to_string(),
                dec!(45),
                position.qty,
                projected,
                DecisionReason::StrategyExit,
            ))
            .await
            .unwrap();

        // Deferred: no sell order went out, the position is intact.
        assert_eq!(exchange.orders.lock().unwrap().len(), orders_before);
        assert!(engine.decisions.is_pending("BTCUSDT").await);
        assert_eq!(engine.open_positions().await.len(), 1);

        // Declining unblocks the symbol and still holds the position.
        engine.resolve("BTCUSDT", false).await.unwrap();
        assert!(!engine.decisions.is_pending("BTCUSDT").await);
        assert_eq!(engine.open_positions().await.len(), 1);
    }

    #[tokio::test]
    async fn confirm_executes_at_the_latest_price() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(44));
        let (engine, exchange) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();
        engine
            .submit_and_run(PendingDecision::exit(
                "BTCUSDT".to_string(),
                dec!(45),
                dec!(1),
                dec!(-5),
                DecisionReason::StrategyExit,
            ))
            .await
            .unwrap();

        engine.resolve("BTCUSDT", true).await.unwrap();
        assert!(engine.open_positions().await.is_empty());

        let orders = exchange.orders.lock().unwrap();
        let sell = orders.iter().find(|(_, side, _)| *side == TradeSide::Sell).unwrap();
        assert_eq!(sell.2, dec!(1));

        let trades = engine.db.recent_trades(10).await.unwrap();
        let sell_trade = trades.iter().find(|t| t.side == TradeSide::Sell).unwrap();
        // Executed at the live 44, not the proposal's 45.
        assert_eq!(sell_trade.price, dec!(44));
    }

    #[tokio::test]
    async fn manual_sell_caps_at_held_quantity() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(60));
        let (engine, exchange) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();
        engine
            .handle_command(OperatorCommand::Sell {
                symbol: "BTCUSDT".to_string(),
                qty: dec!(5),
            })
            .await
            .unwrap();

        let orders = exchange.orders.lock().unwrap();
        let sell = orders.iter().find(|(_, side, _)| *side == TradeSide::Sell).unwrap();
        assert_eq!(sell.2, dec!(1));
    }

    #[tokio::test]
    async fn manual_buy_rejects_unaffordable_quantity() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(50));
        let (engine, exchange) = engine_with(exchange).await;

        // 10 * 50 * 1.001 = 500.5 against a 100 balance.
        engine
            .handle_command(OperatorCommand::Buy {
                symbol: "BTCUSDT".to_string(),
                qty: dec!(10),
            })
            .await
            .unwrap();

        assert!(exchange.orders.lock().unwrap().is_empty());
        assert!(engine.open_positions().await.is_empty());
        assert_eq!(engine.balance.read().await.liquid, dec!(100));
    }

    #[tokio::test]
    async fn manual_buy_rejects_below_minimum_notional() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(50));
        let (engine, exchange) = engine_with(exchange).await;

        engine
            .handle_command(OperatorCommand::Buy {
                symbol: "BTCUSDT".to_string(),
                qty: dec!(0.001),
            })
            .await
            .unwrap();

        assert!(exchange.orders.lock().unwrap().is_empty());
        assert!(engine.open_positions().await.is_empty());
    }

    #[tokio::test]
    async fn nonpositive_exchange_balance_keeps_the_tracked_number() {
        let mut config = BotConfig::default();
        config.live = true;
        let mut exchange = ScriptedExchange::new();
        exchange.balance = Some(Decimal::ZERO);
        let (engine, _) = engine_with_config(config, exchange).await;

        engine.refresh_liquid().await;
        assert_eq!(engine.balance.read().await.liquid, dec!(100));

        // A positive report is adopted.
        let mut config = BotConfig::default();
        config.live = true;
        let mut exchange = ScriptedExchange::new();
        exchange.balance = Some(dec!(250));
        let (engine, _) = engine_with_config(config, exchange).await;

        engine.refresh_liquid().await;
        assert_eq!(engine.balance.read().await.liquid, dec!(250));
    }

    #[tokio::test]
    async fn invested_capital_is_marked_to_current_prices() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(60));
        let (engine, _) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(1)))
            .await
            .unwrap();

        assert_eq!(engine.invested().await, dec!(60));
    }

    #[tokio::test]
    async fn partial_exit_keeps_the_remainder() {
        let mut exchange = ScriptedExchange::new();
        exchange.prices.insert("BTCUSDT".to_string(), dec!(60));
        let (engine, _) = engine_with(exchange).await;

        engine
            .execute_entry(&entry_decision("BTCUSDT", dec!(50), dec!(2)))
            .await
            .unwrap();
        engine
            .execute_exit(&PendingDecision::exit(
                "BTCUSDT".to_string(),
                dec!(60),
                dec!(0.5),
                dec!(0),
                DecisionReason::Manual,
            ))
            .await
            .unwrap();

        let positions = engine.open_positions().await;
        assert_eq!(positions["BTCUSDT"].qty, dec!(1.5));
        // Entry trade stays open until the position fully closes.
        let trades = engine.db.recent_trades(10).await.unwrap();
        let entry = trades.iter().find(|t| t.side == TradeSide::Buy).unwrap();
        assert!(entry.profit.is_none());
    }
}
