mod common;

use chrono::Duration;

use kline_sync::error::SyncError;
use kline_sync::services::kline_store::KlineStore;

use crate::common::{candle_series, setup_test_db, ts};

/// Creating the same symbol table twice is a no-op, not an error.
#[tokio::test]
async fn test_ensure_table_is_idempotent() {
    let store = KlineStore::new(setup_test_db().await);

    store.ensure_table("BTCUSD").await.unwrap();
    store.ensure_table("BTCUSD").await.unwrap();

    assert_eq!(store.candles("BTCUSD").await.unwrap(), vec![]);
}

/// The resume cursor is absent both before the table exists and while it
/// is empty.
#[tokio::test]
async fn test_cursor_absent_for_missing_or_empty_table() {
    let store = KlineStore::new(setup_test_db().await);

    assert_eq!(store.latest_close_time("BTCUSD").await.unwrap(), None);

    store.ensure_table("BTCUSD").await.unwrap();
    assert_eq!(store.latest_close_time("BTCUSD").await.unwrap(), None);
}

/// Upsert creates the table on its own and the cursor lands on the last
/// row's close time.
#[tokio::test]
async fn test_upsert_creates_table_and_sets_cursor() {
    let store = KlineStore::new(setup_test_db().await);
    let series = candle_series(ts(1_577_836_800_000), Duration::hours(4), 8);

    let inserted = store.upsert("BTCUSD", &series).await.unwrap();

    assert_eq!(inserted, 8);
    assert_eq!(store.candles("BTCUSD").await.unwrap(), series);
    assert_eq!(
        store.latest_close_time("BTCUSD").await.unwrap(),
        Some(series.last().unwrap().close_time)
    );
}

/// Upserting the same batch twice leaves the row set unchanged.
#[tokio::test]
async fn test_upsert_is_idempotent() {
    let store = KlineStore::new(setup_test_db().await);
    let series = candle_series(ts(1_577_836_800_000), Duration::hours(4), 8);

    assert_eq!(store.upsert("BTCUSD", &series).await.unwrap(), 8);
    assert_eq!(store.upsert("BTCUSD", &series).await.unwrap(), 0);

    assert_eq!(store.candles("BTCUSD").await.unwrap(), series);
}

/// A batch overlapping stored rows only adds the rows with new keys; the
/// stored rows are never overwritten.
#[tokio::test]
async fn test_upsert_skips_colliding_rows() {
    let store = KlineStore::new(setup_test_db().await);
    let series = candle_series(ts(1_577_836_800_000), Duration::hours(4), 8);

    store.upsert("BTCUSD", &series[..5]).await.unwrap();
    let inserted = store.upsert("BTCUSD", &series).await.unwrap();

    assert_eq!(inserted, 3);
    assert_eq!(store.candles("BTCUSD").await.unwrap(), series);
}

/// The recent-history window returns the newest rows in ascending order.
#[tokio::test]
async fn test_recent_candles_returns_newest_ascending() {
    let store = KlineStore::new(setup_test_db().await);
    let series = candle_series(ts(1_577_836_800_000), Duration::hours(4), 30);
    store.upsert("BTCUSD", &series).await.unwrap();

    let recent = store.recent_candles("BTCUSD", 20).await.unwrap();

    assert_eq!(recent.len(), 20);
    assert_eq!(recent, series[10..]);
    assert!(store.recent_candles("NOTHING", 20).await.unwrap().is_empty());
}

/// Symbols that cannot be table names are rejected before touching the
/// engine.
#[tokio::test]
async fn test_rejects_unsafe_symbol() {
    let store = KlineStore::new(setup_test_db().await);

    let result = store.ensure_table("BTC;DROP TABLE x").await;
    assert!(matches!(result, Err(SyncError::InvalidSymbol(_))));

    let result = store.latest_close_time("a\"b").await;
    assert!(matches!(result, Err(SyncError::InvalidSymbol(_))));
}

/// Each symbol lives in its own table; writes never leak across symbols.
#[tokio::test]
async fn test_symbol_tables_are_independent() {
    let store = KlineStore::new(setup_test_db().await);
    let btc = candle_series(ts(1_577_836_800_000), Duration::hours(4), 6);
    let eth = candle_series(ts(1_600_000_000_000), Duration::hours(1), 3);

    store.upsert("BTCUSD", &btc).await.unwrap();
    store.upsert("ETHUSD", &eth).await.unwrap();

    assert_eq!(store.candles("BTCUSD").await.unwrap(), btc);
    assert_eq!(store.candles("ETHUSD").await.unwrap(), eth);
    assert_eq!(
        store.latest_close_time("ETHUSD").await.unwrap(),
        Some(eth.last().unwrap().close_time)
    );
}
