use sea_orm::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kline_sync::config::Config;
use kline_sync::jobs::klines_sync;
use kline_sync::services::binance::{BinanceConfig, BinanceService, KlineSource};
use kline_sync::services::kline_store::KlineStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kline_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    // Connect to database
    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let store = KlineStore::new(db);

    let fetcher = BinanceService::new(BinanceConfig {
        base_url: config.binance_api_url.clone(),
        ..BinanceConfig::default()
    });

    // Discover the symbol universe
    let mut symbols: Vec<String> = match fetcher.list_symbols().await {
        Ok(symbols) => symbols.into_iter().collect(),
        Err(err) => {
            tracing::error!("Failed to list symbols: {}", err);
            std::process::exit(1);
        }
    };
    if let Some(filter) = &config.symbol_filter {
        symbols.retain(|symbol| symbol.contains(filter.as_str()));
    }

    tracing::info!(
        "Syncing {} symbols at {} granularity",
        symbols.len(),
        config.interval
    );

    let report = klines_sync::sync_all_symbols(
        &fetcher,
        &store,
        symbols,
        config.interval,
        config.max_concurrent_syncs,
    )
    .await;

    if report.has_failures() {
        std::process::exit(1);
    }
}
