//! Streaming price feed and the shared latest-price cache.
//!
//! One background task holds a combined miniTicker WebSocket subscription
//! for the whole watchlist and writes last prices into the cache. The
//! trading cycle reads the cache and falls back to REST when a symbol has
//! no sample yet. The stream is purely a freshness optimization: losing it
//! degrades the bot, never stops it.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Reconnect backoff starts here and doubles per consecutive failure.
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// A healthy combined stream ticks often; silence this long means the
/// connection is dead even if the socket is still open.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Latest observed price per symbol, shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    inner: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, symbol: &str, price: Decimal) {
        self.inner.write().await.insert(symbol.to_string(), price);
    }

    pub async fn get(&self, symbol: &str) -> Option<Decimal> {
        self.inner.read().await.get(symbol).copied()
    }
}

/// Combined-stream envelope: `{"stream":"btcusdt@miniTicker","data":{...}}`.
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: MiniTicker,
}

#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Symbol
    #[serde(rename = "s")]
    symbol: String,
    /// Close (latest) price
    #[serde(rename = "c")]
    close: String,
}

fn stream_url(ws_base: &str, watchlist: &[String]) -> String {
    let streams: Vec<String> = watchlist
        .iter()
        .map(|s| format!("{}@miniTicker", s.to_lowercase()))
        .collect();
    format!("{}/stream?streams={}", ws_base, streams.join("/"))
}

fn parse_tick(text: &str) -> Option<(String, Decimal)> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
    let price = Decimal::from_str(&envelope.data.close).ok()?;
    Some((envelope.data.symbol, price))
}

/// Spawn the feed task. Runs until the process exits, reconnecting with
/// doubling backoff on any failure or idle timeout.
pub fn spawn_feed(ws_base: String, watchlist: Vec<String>, cache: PriceCache) {
    tokio::spawn(async move {
        let url = stream_url(&ws_base, &watchlist);
        let mut delay = RECONNECT_BASE;

        loop {
            match connect_async(url.as_str()).await {
                Ok((mut stream, _)) => {
                    info!(symbols = watchlist.len(), "price feed connected");
                    delay = RECONNECT_BASE;

                    loop {
                        let message = match timeout(IDLE_TIMEOUT, stream.next()).await {
                            Ok(Some(Ok(message))) => message,
                            Ok(Some(Err(err))) => {
                                warn!(error = %err, "price feed stream error");
                                break;
                            }
                            Ok(None) => {
                                warn!("price feed closed by server");
                                break;
                            }
                            Err(_) => {
                                warn!("price feed idle, forcing reconnect");
                                break;
                            }
                        };

                        match message {
                            Message::Text(text) => {
                                if let Some((symbol, price)) = parse_tick(&text) {
                                    cache.set(&symbol, price).await;
                                }
                            }
                            Message::Ping(payload) => {
                                use futures::SinkExt;
                                if stream.send(Message::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => {
                                warn!("price feed received close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "price feed connect failed");
                }
            }

            debug!(?delay, "price feed reconnecting");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(RECONNECT_MAX);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn cache_returns_latest_write() {
        let cache = PriceCache::new();
        assert_eq!(cache.get("BTCUSDT").await, None);

        cache.set("BTCUSDT", dec!(50000)).await;
        cache.set("BTCUSDT", dec!(50100)).await;
        assert_eq!(cache.get("BTCUSDT").await, Some(dec!(50100)));
    }

    #[test]
    fn combined_stream_url() {
        let url = stream_url(
            "wss://stream.binance.com:9443",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@miniTicker/ethusdt@miniTicker"
        );
    }

    #[test]
    fn parses_mini_ticker_envelope() {
        let text = r#"{"stream":"btcusdt@miniTicker","data":{"e":"24hrMiniTicker","s":"BTCUSDT","c":"50123.45","o":"49000","h":"51000","l":"48800","v":"100","q":"5000000"}}"#;
        assert_eq!(
            parse_tick(text),
            Some(("BTCUSDT".to_string(), dec!(50123.45)))
        );
        assert_eq!(parse_tick("not json"), None);
        assert_eq!(parse_tick(r#"{"stream":"x","data":{"s":"X","c":"bad"}}"#), None);
    }
}
