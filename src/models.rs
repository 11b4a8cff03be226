use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::SyncError;

/// One kline row as the exchange serializes it: a 12-element array of mixed
/// integers and numeric strings.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    i64,    // open time (ms)
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time (ms)
    String, // quote asset volume
    i64,    // number of trades
    String, // taker buy base asset volume
    String, // taker buy quote asset volume
    String, // ignore
);

/// One OHLCV candle for a fixed time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub quote_asset_volume: Decimal,
    pub number_of_trades: i64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    pub ignore: String,
}

impl TryFrom<RawKline> for Candle {
    type Error = SyncError;

    fn try_from(raw: RawKline) -> Result<Self, Self::Error> {
        let open_time = DateTime::from_timestamp_millis(raw.0)
            .ok_or_else(|| SyncError::Protocol(format!("open time {} out of range", raw.0)))?;
        let close_time = DateTime::from_timestamp_millis(raw.6)
            .ok_or_else(|| SyncError::Protocol(format!("close time {} out of range", raw.6)))?;
        if open_time >= close_time {
            return Err(SyncError::Protocol(format!(
                "candle opens at {} but closes at {}",
                open_time, close_time
            )));
        }

        Ok(Candle {
            open_time,
            open: raw.1.parse()?,
            high: raw.2.parse()?,
            low: raw.3.parse()?,
            close: raw.4.parse()?,
            volume: raw.5.parse()?,
            close_time,
            quote_asset_volume: raw.7.parse()?,
            number_of_trades: raw.8,
            taker_buy_base_volume: raw.9.parse()?,
            taker_buy_quote_volume: raw.10.parse()?,
            ignore: raw.11,
        })
    }
}

/// Candle bucket widths the klines endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineInterval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl KlineInterval {
    /// The query-parameter spelling the exchange understands.
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::OneMinute => "1m",
            KlineInterval::ThreeMinutes => "3m",
            KlineInterval::FiveMinutes => "5m",
            KlineInterval::FifteenMinutes => "15m",
            KlineInterval::ThirtyMinutes => "30m",
            KlineInterval::OneHour => "1h",
            KlineInterval::TwoHours => "2h",
            KlineInterval::FourHours => "4h",
            KlineInterval::SixHours => "6h",
            KlineInterval::EightHours => "8h",
            KlineInterval::TwelveHours => "12h",
            KlineInterval::OneDay => "1d",
            KlineInterval::ThreeDays => "3d",
            KlineInterval::OneWeek => "1w",
            KlineInterval::OneMonth => "1M",
        }
    }
}

impl Default for KlineInterval {
    fn default() -> Self {
        KlineInterval::FourHours
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(KlineInterval::OneMinute),
            "3m" => Ok(KlineInterval::ThreeMinutes),
            "5m" => Ok(KlineInterval::FiveMinutes),
            "15m" => Ok(KlineInterval::FifteenMinutes),
            "30m" => Ok(KlineInterval::ThirtyMinutes),
            "1h" => Ok(KlineInterval::OneHour),
            "2h" => Ok(KlineInterval::TwoHours),
            "4h" => Ok(KlineInterval::FourHours),
            "6h" => Ok(KlineInterval::SixHours),
            "8h" => Ok(KlineInterval::EightHours),
            "12h" => Ok(KlineInterval::TwelveHours),
            "1d" => Ok(KlineInterval::OneDay),
            "3d" => Ok(KlineInterval::ThreeDays),
            "1w" => Ok(KlineInterval::OneWeek),
            "1M" => Ok(KlineInterval::OneMonth),
            other => Err(format!("unknown kline interval {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const KLINE_PAGE: &str = r#"[
        [1700000000000, "37250.10", "37300.00", "37100.55", "37280.01", "125.5",
         1700014399999, "4675000.25", 8421, "60.25", "2245000.5", "0"]
    ]"#;

    #[test]
    fn test_parses_raw_kline_page() {
        let rows: Vec<RawKline> = serde_json::from_str(KLINE_PAGE).unwrap();
        assert_eq!(rows.len(), 1);

        let candle = Candle::try_from(rows.into_iter().next().unwrap()).unwrap();
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candle.close_time.timestamp_millis(), 1_700_014_399_999);
        assert_eq!(candle.open, dec!(37250.10));
        assert_eq!(candle.low, dec!(37100.55));
        assert_eq!(candle.number_of_trades, 8421);
        assert_eq!(candle.taker_buy_base_volume, dec!(60.25));
        assert_eq!(candle.ignore, "0");
    }

    #[test]
    fn test_rejects_unparsable_price() {
        let raw = RawKline(
            1_700_000_000_000,
            "not-a-number".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            1_700_014_399_999,
            "1".to_string(),
            1,
            "1".to_string(),
            "1".to_string(),
            "0".to_string(),
        );
        assert!(matches!(
            Candle::try_from(raw),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_rejects_candle_closing_before_it_opens() {
        let raw = RawKline(
            1_700_014_399_999,
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            1_700_000_000_000,
            "1".to_string(),
            1,
            "1".to_string(),
            "1".to_string(),
            "0".to_string(),
        );
        assert!(matches!(
            Candle::try_from(raw),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_interval_round_trips_through_strings() {
        for spelling in ["1m", "30m", "4h", "1d", "1w", "1M"] {
            let interval: KlineInterval = spelling.parse().unwrap();
            assert_eq!(interval.to_string(), spelling);
        }
        assert!("4x".parse::<KlineInterval>().is_err());
    }
}
