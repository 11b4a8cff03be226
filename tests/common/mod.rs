use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use kline_sync::error::SyncError;
use kline_sync::models::{Candle, KlineInterval};
use kline_sync::services::binance::KlineSource;

/// Set up a fresh in-memory database; it lives as long as the connection.
pub async fn setup_test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);

    Database::connect(options)
        .await
        .expect("Failed to connect to in-memory database")
}

/// Millisecond epoch shorthand for fixtures.
pub fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

/// Evenly spaced series: `count` candles of width `step` starting at `start`,
/// each closing one millisecond before the next one opens.
pub fn candle_series(start: DateTime<Utc>, step: Duration, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let open_time = start + step * i as i32;
            let close_time = open_time + step - Duration::milliseconds(1);
            let base = Decimal::from(100 + i as i64);
            Candle {
                open_time,
                open: base + dec!(0.5),
                high: base + dec!(1.5),
                low: base - dec!(0.5),
                close: base + dec!(1.0),
                volume: dec!(10.5),
                close_time,
                quote_asset_volume: dec!(1050.25),
                number_of_trades: 42,
                taker_buy_base_volume: dec!(5.25),
                taker_buy_quote_volume: dec!(525.5),
                ignore: "0".to_string(),
            }
        })
        .collect()
}

/// Scripted exchange backed by a fixed series, paged like the real API:
/// requests return the series rows inside `[begin, end]`, capped at
/// `page_limit`, and an empty page past the end.
#[derive(Clone)]
#[allow(dead_code)]
pub struct FakeSource {
    pub series: Arc<Vec<Candle>>,
    pub server_time: DateTime<Utc>,
    pub page_limit: usize,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn new(series: Vec<Candle>, server_time: DateTime<Utc>) -> Self {
        Self {
            series: Arc::new(series),
            server_time,
            page_limit: 1000,
        }
    }
}

#[async_trait]
impl KlineSource for FakeSource {
    async fn list_symbols(&self) -> Result<BTreeSet<String>, SyncError> {
        Ok(BTreeSet::from(["BTCUSD".to_string()]))
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError> {
        Ok(self.server_time)
    }

    async fn get_historical(
        &self,
        _symbol: &str,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        _interval: KlineInterval,
    ) -> Result<Vec<Candle>, SyncError> {
        Ok(self
            .series
            .iter()
            .filter(|candle| begin.is_none_or(|b| candle.open_time >= b))
            .filter(|candle| end.is_none_or(|e| candle.open_time <= e))
            .take(self.page_limit)
            .cloned()
            .collect())
    }
}
