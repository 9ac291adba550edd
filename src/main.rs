//! Autonomous trailing-stop trading bot.
//!
//! Sizes every entry off a fixed risk budget, trails stops behind the
//! high-water mark, and routes loss-taking sells through an operator
//! confirmation channel.

mod api;
mod bot;
mod config;
mod db;
mod feed;
mod models;
mod strategy;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::prelude::ToPrimitive;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::bot::Bot;
use crate::config::BotConfig;
use crate::db::Database;

/// Trailing-stop trading bot CLI.
#[derive(Parser)]
#[command(name = "trailbot")]
#[command(about = "Risk-budgeted trading bot with trailing exits and operator confirmation", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:trailbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading bot
    Run {
        /// Seconds between trading cycles
        #[arg(short, long)]
        interval: Option<u64>,

        /// Place real orders instead of simulating them
        #[arg(long)]
        live: bool,
    },

    /// Show account balance and recent trades
    Summary,

    /// Show open positions
    Status,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = BotConfig::from_env()?;
    config.database_url = cli.database.clone();

    match cli.command {
        Commands::Run { interval, live } => {
            if let Some(interval) = interval {
                config.cycle_interval_secs = interval;
            }
            if live {
                config.live = true;
            }

            let mut bot = Bot::new(config.clone()).await?;
            bot.initialize().await?;

            println!("\n=== Trailbot ===");
            println!("Watchlist:      {}", config.watchlist.join(", "));
            println!("Strategy:       {}", config.strategy.name);
            println!("Cycle interval: {}s", config.cycle_interval_secs);
            println!(
                "Mode:           {}",
                if config.live { "LIVE TRADING" } else { "SIMULATION" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Summary => {
            let db = Database::new(&cli.database).await?;

            match db.load_balance().await? {
                Some((liquid, total)) => {
                    println!("\n=== Account ===");
                    println!("Liquid balance: {}", liquid.round_dp(2));
                    println!("Total value:    {}", total.round_dp(2));
                }
                None => println!("No persisted balance yet. Run 'trailbot run' first."),
            }

            let realized = db.realized_profit().await?;
            println!("Realized P&L:   {}", realized.round_dp(2));
            if let Some(avg) = db.average_profit_pct(10).await? {
                println!(
                    "Avg profit (last 10 closes): {:.2}%",
                    avg.to_f64().unwrap_or(0.0)
                );
            }

            let trades = db.recent_trades(10).await?;
            if trades.is_empty() {
                println!("\nNo trades recorded.");
            } else {
                println!("\n{:<10} {:<5} {:>12} {:>12} {:>10}", "SYMBOL", "SIDE", "QTY", "PRICE", "PROFIT");
                println!("{}", "-".repeat(53));
                for trade in trades {
                    println!(
                        "{:<10} {:<5} {:>12} {:>12} {:>10}",
                        trade.symbol,
                        trade.side.as_str(),
                        trade.qty,
                        trade.price,
                        trade
                            .profit
                            .map_or_else(|| "-".to_string(), |p| p.round_dp(4).to_string()),
                    );
                }
            }
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;
            let positions = db.load_positions().await?;

            if positions.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            println!(
                "\n{:<10} {:>12} {:>12} {:>12} {:>12} {:>12}",
                "SYMBOL", "QTY", "ENTRY", "STOP", "TARGET", "HIGH"
            );
            println!("{}", "-".repeat(74));
            for position in positions.values() {
                println!(
                    "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12}",
                    position.symbol,
                    position.qty,
                    position.entry,
                    position
                        .stop
                        .map_or_else(|| "-".to_string(), |s| s.to_string()),
                    position
                        .take_profit
                        .map_or_else(|| "-".to_string(), |t| t.to_string()),
                    position.high_water,
                );
            }
        }

        Commands::Config => {
            println!("\n=== Bot Configuration ===\n");
            println!("Watchlist:            {}", config.watchlist.join(", "));
            println!("Quote asset:          {}", config.quote_asset);
            println!("Start balance:        {}", config.start_balance);
            println!("Cycle interval:       {}s", config.cycle_interval_secs);
            println!("Invest cap:           {}", config.invest_cap());
            println!("Max orders per cycle: {}", config.max_orders_per_cycle);

            println!("\nRisk:");
            println!("  Risk per trade:     {}", config.risk.risk_fraction);
            println!("  Stop source:        {:?}", config.risk.stop_source);
            println!("  Stop distance:      {}%", config.risk.stop_pct * rust_decimal::Decimal::ONE_HUNDRED);
            println!("  Reward multiple:    {}", config.risk.reward_multiple);
            println!("  Fee per side:       {}", config.risk.fee_rate);
            println!("  Min exit profit:    {}%", config.risk.min_exit_pct);
            println!("  Trade notional:     {} .. {}", config.risk.min_notional, config.risk.max_notional);
            println!("  Confirm threshold:  {}", config.risk.confirm_threshold);

            println!("\nStrategy ({})", config.strategy.name);
            println!("  MA windows:         {} / {}", config.strategy.short_window, config.strategy.long_window);
            println!("  RSI period:         {}", config.strategy.rsi_period);
            println!("  RSI bands:          {} / {}", config.strategy.oversold, config.strategy.overbought);
            println!("  Min exit P&L:       {}%", config.strategy.min_pnl_pct);
            println!("  Blocked words:      {}", config.strategy.bad_words.join(", "));
        }
    }

    Ok(())
}
