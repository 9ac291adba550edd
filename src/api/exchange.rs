//! Exchange REST client.
//!
//! Read paths (price, candles, account) hit the exchange directly. Order
//! placement is gated on live mode: in simulation the order is acknowledged
//! locally with a generated id and never leaves the process.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::TradeSide;

use super::RetryPolicy;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Acknowledgement for a placed (or simulated) order.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub client_order_id: String,
    pub simulated: bool,
}

/// Market-data and order surface the bot trades through.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Free balance of one asset.
    async fn balance(&self, asset: &str) -> Result<Decimal>;

    /// Latest traded price for a symbol.
    async fn price(&self, symbol: &str) -> Result<Decimal>;

    /// Recent close prices, oldest first.
    async fn candles(&self, symbol: &str, limit: usize) -> Result<Vec<f64>>;

    /// Place a market order.
    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        qty: Decimal,
    ) -> Result<OrderReceipt>;

    /// All non-zero asset holdings, keyed by asset.
    async fn holdings(&self) -> Result<HashMap<String, Decimal>>;
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

/// Binance-style REST exchange client.
pub struct RestExchange {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    live: bool,
    retry: RetryPolicy,
}

impl RestExchange {
    pub fn new(base_url: String, api_key: Option<String>, live: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            live,
            retry: RetryPolicy::default(),
        })
    }

    fn authed(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let key = self
            .api_key
            .as_deref()
            .context("exchange API key not configured")?;
        Ok(self.client.get(url).header("X-MBX-APIKEY", key))
    }

    async fn account(&self) -> Result<AccountInfo> {
        let url = format!("{}/api/v3/account", self.base_url);
        self.retry
            .run("account", || async {
                let response = self
                    .authed(&url)?
                    .send()
                    .await
                    .context("Failed to fetch account")?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Account request failed: {} - {}", status, body);
                }
                response
                    .json::<AccountInfo>()
                    .await
                    .context("Failed to parse account response")
            })
            .await
    }
}

#[async_trait]
impl Exchange for RestExchange {
    async fn balance(&self, asset: &str) -> Result<Decimal> {
        let account = self.account().await?;
        let free = account
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| Decimal::from_str(&b.free))
            .transpose()
            .context("Failed to parse asset balance")?
            .unwrap_or(Decimal::ZERO);
        Ok(free)
    }

    async fn price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let ticker = self
            .retry
            .run("ticker", || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .context("Failed to fetch ticker")?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Ticker request failed: {} - {}", status, body);
                }
                response
                    .json::<TickerPrice>()
                    .await
                    .context("Failed to parse ticker response")
            })
            .await?;

        Decimal::from_str(&ticker.price).context("Failed to parse ticker price")
    }

    async fn candles(&self, symbol: &str, limit: usize) -> Result<Vec<f64>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval=1m&limit={}",
            self.base_url, symbol, limit
        );
        let rows = self
            .retry
            .run("klines", || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .context("Failed to fetch klines")?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Klines request failed: {} - {}", status, body);
                }
                response
                    .json::<Vec<Vec<serde_json::Value>>>()
                    .await
                    .context("Failed to parse klines response")
            })
            .await?;

        // Close price sits at index 4 of each kline row, as a string.
        let mut closes = Vec::with_capacity(rows.len());
        for row in &rows {
            let close = row
                .get(4)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .context("Malformed kline row")?;
            closes.push(close);
        }
        Ok(closes)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        qty: Decimal,
    ) -> Result<OrderReceipt> {
        let client_order_id = Uuid::new_v4().to_string();

        if !self.live {
            info!(
                symbol = %symbol,
                side = %side,
                qty = %qty,
                order_id = %client_order_id,
                "simulated order"
            );
            return Ok(OrderReceipt {
                client_order_id,
                simulated: true,
            });
        }

        let url = format!("{}/api/v3/order", self.base_url);
        let key = self
            .api_key
            .as_deref()
            .context("exchange API key not configured")?;
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_uppercase()),
            ("type", "MARKET".to_string()),
            ("quantity", qty.to_string()),
            ("newClientOrderId", client_order_id.clone()),
        ];

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", key)
            .form(&params)
            .send()
            .await
            .context("Failed to place order")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Order request failed: {} - {}", status, body);
        }

        debug!(symbol = %symbol, order_id = %client_order_id, "order accepted");
        Ok(OrderReceipt {
            client_order_id,
            simulated: false,
        })
    }

    async fn holdings(&self) -> Result<HashMap<String, Decimal>> {
        let account = self.account().await?;
        let mut holdings = HashMap::new();
        for balance in &account.balances {
            let free = Decimal::from_str(&balance.free).unwrap_or(Decimal::ZERO);
            let locked = Decimal::from_str(&balance.locked).unwrap_or(Decimal::ZERO);
            let total = free + locked;
            if total > Decimal::ZERO {
                holdings.insert(balance.asset.clone(), total);
            }
        }
        Ok(holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn simulated_orders_never_touch_the_wire() {
        // Unroutable base URL proves no request is made in simulation.
        let exchange =
            RestExchange::new("http://127.0.0.1:1".to_string(), None, false).unwrap();
        let receipt = exchange
            .place_order("BTCUSDT", TradeSide::Buy, dec!(0.5))
            .await
            .unwrap();
        assert!(receipt.simulated);
        assert!(!receipt.client_order_id.is_empty());
    }

    #[tokio::test]
    async fn live_orders_require_an_api_key() {
        let exchange =
            RestExchange::new("http://127.0.0.1:1".to_string(), None, true).unwrap();
        let result = exchange
            .place_order("BTCUSDT", TradeSide::Buy, dec!(0.5))
            .await;
        assert!(result.is_err());
    }

}
