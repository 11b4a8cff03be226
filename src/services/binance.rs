use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;

use crate::error::SyncError;
use crate::models::{Candle, KlineInterval, RawKline};

/// Largest number of klines the exchange returns per request.
const KLINES_PAGE_LIMIT: u32 = 1000;

/// Entry of the ticker price list
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Server clock response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

/// Connection settings for the exchange API.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry_max: u32,
    pub retry_delay_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 30,
            retry_max: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Read access to an exchange's kline data.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Every symbol the exchange currently lists.
    async fn list_symbols(&self) -> Result<BTreeSet<String>, SyncError>;

    /// The exchange's current clock reading.
    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError>;

    /// Up to one page of candles for `symbol` between `begin` and `end`
    /// (both inclusive, both optional), ascending by open time. An empty
    /// page means the exchange has nothing in range.
    async fn get_historical(
        &self,
        symbol: &str,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        interval: KlineInterval,
    ) -> Result<Vec<Candle>, SyncError>;
}

/// Client for the Binance spot REST API.
///
/// Clones share the HTTP connection pool and the last observed server time.
#[derive(Clone)]
pub struct BinanceService {
    client: Client,
    base_url: String,
    retry_max: u32,
    retry_delay_ms: u64,
    last_server_time: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl BinanceService {
    pub fn new(config: BinanceConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap(),
            base_url: config.base_url,
            retry_max: config.retry_max,
            retry_delay_ms: config.retry_delay_ms,
            last_server_time: Arc::new(RwLock::new(None)),
        }
    }

    /// GET with exponential backoff retry on transport or non-2xx failures.
    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, SyncError> {
        let mut delay = Duration::from_millis(self.retry_delay_ms);
        let mut attempt = 0;

        loop {
            match self.client.get(url).query(params).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    if attempt + 1 >= self.retry_max {
                        let status = response.status();
                        // Redirects are followed in-client, so a terminal
                        // non-2xx is 4xx/5xx and converts to a transport
                        // error; any other status is a protocol anomaly.
                        return match response.error_for_status() {
                            Err(err) => Err(err.into()),
                            Ok(_) => Err(SyncError::Protocol(format!(
                                "unexpected status {} from {}",
                                status, url
                            ))),
                        };
                    }
                }
                Err(err) => {
                    if attempt + 1 >= self.retry_max {
                        return Err(err.into());
                    }
                }
            }

            attempt += 1;
            tracing::warn!(
                "Retry {}/{} for {}. Waiting {:?}",
                attempt,
                self.retry_max,
                url,
                delay
            );
            tokio::time::sleep(delay).await;
            delay *= 2; // Exponential backoff
        }
    }

    async fn fetch_server_time(&self) -> Result<DateTime<Utc>, SyncError> {
        let url = format!("{}/api/v3/time", self.base_url);
        let response = self.get_with_retry(&url, &[]).await?;
        let body = response.text().await?;
        let time: ServerTime = serde_json::from_str(&body)?;

        DateTime::from_timestamp_millis(time.server_time).ok_or_else(|| {
            SyncError::Protocol(format!("server time {} out of range", time.server_time))
        })
    }
}

#[async_trait]
impl KlineSource for BinanceService {
    async fn list_symbols(&self) -> Result<BTreeSet<String>, SyncError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let response = self.get_with_retry(&url, &[]).await?;
        let body = response.text().await?;
        let tickers: Vec<TickerPrice> = serde_json::from_str(&body)?;

        Ok(tickers
            .into_iter()
            .map(|ticker| ticker.symbol.trim().to_string())
            .collect())
    }

    /// On failure the last successfully observed value is reused when one
    /// exists; only a failure with an empty cache propagates.
    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError> {
        match self.fetch_server_time().await {
            Ok(now) => {
                *self.last_server_time.write() = Some(now);
                Ok(now)
            }
            Err(err) => {
                let cached = *self.last_server_time.read();
                match cached {
                    Some(last) => {
                        tracing::warn!(
                            "Server time request failed ({}), reusing last observed value {}",
                            err,
                            last
                        );
                        Ok(last)
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn get_historical(
        &self,
        symbol: &str,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        interval: KlineInterval,
    ) -> Result<Vec<Candle>, SyncError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("limit", KLINES_PAGE_LIMIT.to_string()),
        ];
        if let Some(begin) = begin {
            params.push(("startTime", begin.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            params.push(("endTime", end.timestamp_millis().to_string()));
        }

        let response = self.get_with_retry(&url, &params).await?;
        let body = response.text().await?;
        let rows: Vec<RawKline> = serde_json::from_str(&body)?;

        let mut candles = rows
            .into_iter()
            .map(Candle::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // Oldest first
        candles.sort_by_key(|candle| candle.open_time);

        Ok(candles)
    }
}
