//! Telegram operator channel.
//!
//! Outbound notifications are fire-and-forget: a delivery failure is logged
//! and swallowed so it can never stall or crash the trading cycle. Inbound
//! commands arrive via long-polled `getUpdates`.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

const TELEGRAM_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;

/// A parsed operator instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Buy { symbol: String, qty: Decimal },
    Sell { symbol: String, qty: Decimal },
    Confirm { symbol: String },
    Decline { symbol: String },
    Help,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    ok: bool,
    result: Option<Message>,
}

pub struct Messenger {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl Messenger {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        // The HTTP timeout must exceed the long-poll hold time.
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: TELEGRAM_BASE.to_string(),
            token,
            chat_id,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Send a status message. Failures are logged, never propagated.
    pub async fn notify(&self, text: &str) {
        let result = self
            .client
            .post(self.url("sendMessage"))
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "notification rejected");
            }
            Err(err) => warn!(error = %err, "notification failed"),
            _ => {}
        }
    }

    /// Ask the operator a yes/no question. Returns the message id for
    /// correlating the eventual reply, or None if delivery failed.
    pub async fn ask_confirmation(&self, text: &str) -> Option<i64> {
        let result = self
            .client
            .post(self.url("sendMessage"))
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "confirmation request rejected");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "confirmation request failed");
                return None;
            }
        };

        match response.json::<SendResponse>().await {
            Ok(sent) if sent.ok => sent.result.map(|m| m.message_id),
            _ => None,
        }
    }

    /// Long-poll for operator commands. Returns the parsed commands and the
    /// offset to use on the next poll. Messages from other chats are
    /// dropped.
    pub async fn poll_updates(&self, offset: i64) -> Result<(Vec<OperatorCommand>, i64)> {
        let url = format!(
            "{}?timeout={}&offset={}",
            self.url("getUpdates"),
            POLL_TIMEOUT_SECS,
            offset
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to poll updates")?;
        let updates: UpdatesResponse = response
            .json()
            .await
            .context("Failed to parse updates response")?;
        if !updates.ok {
            anyhow::bail!("Telegram getUpdates returned ok=false");
        }

        let mut next_offset = offset;
        let mut commands = Vec::new();
        for update in updates.result {
            next_offset = next_offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != self.chat_id {
                debug!(chat = message.chat.id, "ignoring message from foreign chat");
                continue;
            }
            let Some(text) = message.text.as_deref() else {
                continue;
            };
            match parse_command(text) {
                Some(command) => commands.push(command),
                None => debug!(text = %text, "unrecognized operator message"),
            }
        }
        Ok((commands, next_offset))
    }

    /// Usage text sent in reply to HELP or malformed commands.
    pub fn help_text() -> &'static str {
        "Commands:\n\
         BUY <symbol> <qty>\n\
         SELL <symbol> <qty>\n\
         CONFIRM <symbol>\n\
         DECLINE <symbol>\n\
         HELP"
    }
}

fn parse_command(text: &str) -> Option<OperatorCommand> {
    let mut parts = text.split_whitespace();
    let verb = parts.next()?.to_uppercase();
    match verb.as_str() {
        "BUY" | "SELL" => {
            let symbol = parts.next()?.to_uppercase();
            let qty: Decimal = parts.next()?.parse().ok()?;
            if qty <= Decimal::ZERO || parts.next().is_some() {
                return None;
            }
            if verb == "BUY" {
                Some(OperatorCommand::Buy { symbol, qty })
            } else {
                Some(OperatorCommand::Sell { symbol, qty })
            }
        }
        "CONFIRM" | "DECLINE" => {
            let symbol = parts.next()?.to_uppercase();
            if parts.next().is_some() {
                return None;
            }
            if verb == "CONFIRM" {
                Some(OperatorCommand::Confirm { symbol })
            } else {
                Some(OperatorCommand::Decline { symbol })
            }
        }
        "HELP" => Some(OperatorCommand::Help),
        _ => None,
    }
}
