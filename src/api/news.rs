//! Headline fetcher used by the pre-entry news filter.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

const NEWS_API_BASE: &str = "https://newsapi.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const HEADLINE_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
}

pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NewsClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: NEWS_API_BASE.to_string(),
            api_key,
        })
    }

    /// Recent headlines mentioning the asset. Degrades to an empty list on
    /// any failure so a news outage can only suppress the filter, never
    /// block trading.
    pub async fn headlines(&self, asset: &str) -> Vec<String> {
        match self.fetch(asset).await {
            Ok(titles) => titles,
            Err(err) => {
                warn!(asset = %asset, error = %err, "headline fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, asset: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/v2/everything?q={}&sortBy=publishedAt&pageSize={}&apiKey={}",
            self.base_url, asset, HEADLINE_LIMIT, self.api_key
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch headlines")?;
        if !response.status().is_success() {
            anyhow::bail!("News request failed: {}", response.status());
        }
        let parsed: NewsResponse = response
            .json()
            .await
            .context("Failed to parse news response")?;
        Ok(parsed
            .articles
            .into_iter()
            .filter_map(|a| a.title)
            .take(HEADLINE_LIMIT)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outage_degrades_to_empty() {
        let mut client = NewsClient::new("k".to_string()).unwrap();
        client.base_url = "http://127.0.0.1:1".to_string();
        assert!(client.headlines("BTC").await.is_empty());
    }
}
