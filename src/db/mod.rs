//! SQLite persistence for full bot state management.
//!
//! Stores everything needed to resume after restart:
//! - Trade ledger with realized profit written once at close
//! - Open positions with stop, target, and high-water state
//! - Rolling per-symbol price history for strategy warm-up
//! - Simulated account balance
//!
//! Money values cross the database boundary as f64 and are lifted back
//! into `Decimal` immediately on read.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Position, TradeRecord, TradeSide};

/// Rolling price history keeps this many rows per symbol.
const PRICE_RETENTION: i64 = 200;

/// Database connection pool with full state management.
pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: i64,
    symbol: String,
    side: String,
    qty: f64,
    price: f64,
    timestamp: String,
    profit: Option<f64>,
    profit_pct: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    symbol: String,
    qty: f64,
    entry: f64,
    stop: Option<f64>,
    take_profit: Option<f64>,
    high_water: f64,
    stop_distance: f64,
    trade_id: i64,
    opened_at: String,
}

fn decimal(value: f64, what: &str) -> Result<Decimal> {
    Decimal::from_f64(value).with_context(|| format!("non-finite {what} in database: {value}"))
}

fn f64_of(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl StoredTrade {
    fn into_record(self) -> Result<TradeRecord> {
        let side = TradeSide::parse(&self.side)
            .with_context(|| format!("unknown trade side '{}' in database", self.side))?;
        Ok(TradeRecord {
            id: self.id,
            symbol: self.symbol,
            side,
            qty: decimal(self.qty, "trade qty")?,
            price: decimal(self.price, "trade price")?,
            timestamp: parse_timestamp(&self.timestamp),
            profit: self.profit.map(|p| decimal(p, "trade profit")).transpose()?,
            profit_pct: self
                .profit_pct
                .map(|p| decimal(p, "trade profit_pct"))
                .transpose()?,
        })
    }
}

impl StoredPosition {
    fn into_position(self) -> Result<Position> {
        Ok(Position {
            symbol: self.symbol,
            qty: decimal(self.qty, "position qty")?,
            entry: decimal(self.entry, "position entry")?,
            stop: self.stop.map(|s| decimal(s, "position stop")).transpose()?,
            take_profit: self
                .take_profit
                .map(|t| decimal(t, "position target"))
                .transpose()?,
            high_water: decimal(self.high_water, "position high water")?,
            stop_distance: decimal(self.stop_distance, "position stop distance")?,
            trade_id: self.trade_id,
            opened_at: parse_timestamp(&self.opened_at),
        })
    }
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // An in-memory SQLite database exists per connection, so the pool
        // must not grow past one there or state scatters across databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty REAL NOT NULL,
                price REAL NOT NULL,
                timestamp TEXT NOT NULL,
                profit REAL,
                profit_pct REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                qty REAL NOT NULL,
                entry REAL NOT NULL,
                stop REAL,
                take_profit REAL,
                high_water REAL NOT NULL,
                stop_distance REAL NOT NULL,
                trade_id INTEGER NOT NULL,
                opened_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_prices_symbol ON prices (symbol, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                liquid REAL NOT NULL,
                total REAL NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trades ====================

    /// Append an execution to the ledger. Returns the new row id.
    pub async fn record_trade(
        &self,
        symbol: &str,
        side: TradeSide,
        qty: Decimal,
        price: Decimal,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO trades (symbol, side, qty, price, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(side.as_str())
        .bind(f64_of(qty))
        .bind(f64_of(price))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record trade")?;

        Ok(result.last_insert_rowid())
    }

    /// Write realized profit onto the opening trade. The guard clause makes
    /// this idempotent: profit is set exactly once per trade.
    pub async fn close_trade(
        &self,
        trade_id: i64,
        profit: Decimal,
        profit_pct: Decimal,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trades SET profit = ?, profit_pct = ? WHERE id = ? AND profit IS NULL",
        )
        .bind(f64_of(profit))
        .bind(f64_of(profit_pct))
        .bind(trade_id)
        .execute(&self.pool)
        .await
        .context("Failed to close trade")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load trades")?;

        rows.into_iter().map(StoredTrade::into_record).collect()
    }

    /// Mean realized profit percentage over the last `n` closed trades.
    pub async fn average_profit_pct(&self, n: i64) -> Result<Option<Decimal>> {
        let avg: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(profit_pct) FROM (
                SELECT profit_pct FROM trades
                WHERE profit_pct IS NOT NULL
                ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(n)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute average profit")?;

        avg.map(|a| decimal(a, "average profit")).transpose()
    }

    pub async fn realized_profit(&self) -> Result<Decimal> {
        let total: Option<f64> =
            sqlx::query_scalar("SELECT SUM(profit) FROM trades WHERE profit IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .context("Failed to sum realized profit")?;
        decimal(total.unwrap_or(0.0), "realized profit")
    }

    // ==================== Positions ====================

    /// Insert or replace the stored state of one position.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (symbol, qty, entry, stop, take_profit, high_water, stop_distance, trade_id, opened_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                qty = excluded.qty,
                entry = excluded.entry,
                stop = excluded.stop,
                take_profit = excluded.take_profit,
                high_water = excluded.high_water,
                stop_distance = excluded.stop_distance,
                trade_id = excluded.trade_id
            "#,
        )
        .bind(&position.symbol)
        .bind(f64_of(position.qty))
        .bind(f64_of(position.entry))
        .bind(position.stop.map(f64_of))
        .bind(position.take_profit.map(f64_of))
        .bind(f64_of(position.high_water))
        .bind(f64_of(position.stop_distance))
        .bind(position.trade_id)
        .bind(position.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save position")?;

        Ok(())
    }

    pub async fn delete_position(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await
            .context("Failed to delete position")?;
        Ok(())
    }

    pub async fn load_positions(&self) -> Result<HashMap<String, Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>("SELECT * FROM positions")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load positions")?;

        let mut positions = HashMap::new();
        for row in rows {
            let position = row.into_position()?;
            positions.insert(position.symbol.clone(), position);
        }
        Ok(positions)
    }

    // ==================== Prices ====================

    /// Append a price sample and prune the symbol's history to the
    /// retention window.
    pub async fn save_price(&self, symbol: &str, price: Decimal) -> Result<()> {
        sqlx::query("INSERT INTO prices (symbol, price) VALUES (?, ?)")
            .bind(symbol)
            .bind(f64_of(price))
            .execute(&self.pool)
            .await
            .context("Failed to save price")?;

        sqlx::query(
            r#"
            DELETE FROM prices WHERE symbol = ? AND id NOT IN (
                SELECT id FROM prices WHERE symbol = ? ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(symbol)
        .bind(symbol)
        .bind(PRICE_RETENTION)
        .execute(&self.pool)
        .await
        .context("Failed to prune prices")?;

        Ok(())
    }

    /// Last `limit` prices for a symbol, oldest first.
    pub async fn price_history(&self, symbol: &str, limit: i64) -> Result<Vec<f64>> {
        let mut prices: Vec<f64> = sqlx::query_scalar(
            "SELECT price FROM prices WHERE symbol = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load price history")?;

        prices.reverse();
        Ok(prices)
    }

    // ==================== Balance ====================

    pub async fn save_balance(&self, liquid: Decimal, total: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balance (id, liquid, total, updated_at)
            VALUES (1, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                liquid = excluded.liquid,
                total = excluded.total,
                updated_at = datetime('now')
            "#,
        )
        .bind(f64_of(liquid))
        .bind(f64_of(total))
        .execute(&self.pool)
        .await
        .context("Failed to save balance")?;

        Ok(())
    }

    /// Stored (liquid, total) balance, if any run has persisted one.
    pub async fn load_balance(&self) -> Result<Option<(Decimal, Decimal)>> {
        let row: Option<(f64, f64)> =
            sqlx::query_as("SELECT liquid, total FROM balance WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load balance")?;

        row.map(|(liquid, total)| {
            Ok((decimal(liquid, "liquid balance")?, decimal(total, "total balance")?))
        })
        .transpose()
    }
}
