use std::env;

use crate::models::KlineInterval;

/// Runtime settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub binance_api_url: String,
    pub interval: KlineInterval,
    pub max_concurrent_syncs: usize,
    /// Only sync symbols containing this substring (e.g. "USD").
    pub symbol_filter: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env_str("DATABASE_URL", "sqlite://klines.sqlite3?mode=rwc"),
            binance_api_url: env_str("BINANCE_API_URL", "https://api.binance.com"),
            interval: match env::var("KLINE_INTERVAL") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .expect("KLINE_INTERVAL must be a valid kline interval"),
                Err(_) => KlineInterval::default(),
            },
            max_concurrent_syncs: env_usize("MAX_CONCURRENT_SYNCS", 8),
            symbol_filter: env::var("SYMBOL_FILTER").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
