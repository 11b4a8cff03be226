use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::error::SyncError;
use crate::models::{Candle, KlineInterval};
use crate::services::binance::KlineSource;
use crate::services::kline_store::KlineStore;

/// Stored rows inspected when judging a new batch's granularity.
const GRANULARITY_PROBE_ROWS: u64 = 20;

/// Terminal state of one symbol's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cursor reached the server's clock.
    CaughtUp,
    /// The server has no more data past the cursor.
    Exhausted,
}

/// Outcome counts for a whole run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub caught_up: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub rows_inserted: u64,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Modal gap between consecutive open times, in milliseconds. `None` when
/// there are not enough rows to form a gap.
fn dominant_delta_ms(candles: &[Candle]) -> Option<i64> {
    if candles.len() < 2 {
        return None;
    }

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in candles.windows(2) {
        let delta = (pair[1].open_time - pair[0].open_time).num_milliseconds();
        *counts.entry(delta).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by_key(|(delta, count)| (*count, Reverse(*delta)))
        .map(|(delta, _)| delta)
}

/// Rejects a batch whose candle period does not fit the rows already stored.
///
/// The stored period is inferred from the modal open-time gap of the most
/// recent rows rather than read from configuration, so a table keeps
/// validating against what it actually contains. A batch with a different
/// period is still accepted when it sits on the stored grid, i.e. the gap
/// from the newest stored open time to the batch's latest open time is an
/// exact multiple of the stored period.
fn check_granularity(stored: &[Candle], batch: &[Candle]) -> Result<(), SyncError> {
    let Some(stored_ms) = dominant_delta_ms(stored) else {
        return Ok(());
    };
    let Some(batch_ms) = dominant_delta_ms(batch) else {
        return Ok(());
    };
    if stored_ms == batch_ms || stored_ms <= 0 {
        return Ok(());
    }

    let newest_stored = match stored.last() {
        Some(candle) => candle.open_time,
        None => return Ok(()),
    };
    let batch_latest = match batch.iter().map(|candle| candle.open_time).max() {
        Some(open_time) => open_time,
        None => return Ok(()),
    };

    let gap = (batch_latest - newest_stored).num_milliseconds();
    if gap.rem_euclid(stored_ms) == 0 {
        Ok(())
    } else {
        Err(SyncError::GranularityMismatch { stored_ms, batch_ms })
    }
}

/// Drive one symbol from its stored cursor up to the server's current time.
///
/// Returns the terminal outcome and the number of rows inserted. Each pass
/// of the loop fetches one page starting at the cursor, validates it
/// against recent stored history, upserts it, and advances the cursor to
/// the page's max close time. An empty page or a cursor that stops moving
/// ends the loop as [`SyncOutcome::Exhausted`]; a cursor at or past the
/// server clock ends it as [`SyncOutcome::CaughtUp`].
pub async fn sync_symbol<S: KlineSource>(
    source: &S,
    store: &KlineStore,
    symbol: &str,
    interval: KlineInterval,
) -> Result<(SyncOutcome, u64), SyncError> {
    let server_time = source.server_time().await?;

    let mut cursor = store.latest_close_time(symbol).await?;
    if cursor.is_none() {
        store.ensure_table(symbol).await?;
    }

    let mut rows_inserted = 0u64;
    let mut pages = 0u32;

    loop {
        if let Some(at) = cursor {
            if at >= server_time {
                tracing::debug!(
                    "{} caught up to server time {} after {} pages",
                    symbol,
                    server_time,
                    pages
                );
                return Ok((SyncOutcome::CaughtUp, rows_inserted));
            }
        }

        let batch = source
            .get_historical(symbol, cursor, Some(server_time), interval)
            .await?;
        if batch.is_empty() {
            tracing::debug!("{} exhausted after {} pages", symbol, pages);
            return Ok((SyncOutcome::Exhausted, rows_inserted));
        }

        let history = store.recent_candles(symbol, GRANULARITY_PROBE_ROWS).await?;
        check_granularity(&history, &batch)?;

        rows_inserted += store.upsert(symbol, &batch).await?;
        pages += 1;

        let Some(batch_close) = batch.iter().map(|candle| candle.close_time).max() else {
            return Ok((SyncOutcome::Exhausted, rows_inserted));
        };
        if cursor.is_some_and(|at| batch_close <= at) {
            // Same page again; the server is not advancing us
            tracing::debug!("{} cursor stuck at {}", symbol, batch_close);
            return Ok((SyncOutcome::Exhausted, rows_inserted));
        }
        cursor = Some(batch_close);
    }
}

/// Sync every symbol with at most `max_in_flight` running at once.
///
/// Symbols are independent: one failing or running out of data never stops
/// the rest. A task that panics counts as that symbol failing.
pub async fn sync_all_symbols<S>(
    source: &S,
    store: &KlineStore,
    symbols: impl IntoIterator<Item = String>,
    interval: KlineInterval,
    max_in_flight: usize,
) -> SyncReport
where
    S: KlineSource + Clone + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));

    let mut handles = Vec::new();
    for symbol in symbols {
        let source = source.clone();
        let store = store.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = sync_symbol(&source, &store, &symbol, interval).await;
            (symbol, result)
        }));
    }

    let mut report = SyncReport::default();
    for joined in join_all(handles).await {
        match joined {
            Ok((symbol, Ok((outcome, rows)))) => {
                report.rows_inserted += rows;
                match outcome {
                    SyncOutcome::CaughtUp => report.caught_up += 1,
                    SyncOutcome::Exhausted => report.exhausted += 1,
                }
                tracing::debug!("{} finished {:?} with {} new rows", symbol, outcome, rows);
            }
            Ok((symbol, Err(err))) => {
                report.failed += 1;
                tracing::error!("Failed to sync {}: {}", symbol, err);
            }
            Err(err) => {
                report.failed += 1;
                tracing::error!("Sync task aborted: {}", err);
            }
        }
    }

    tracing::info!(
        "✅ Klines sync complete: {} caught up, {} exhausted, {} failed, {} rows inserted",
        report.caught_up,
        report.exhausted,
        report.failed,
        report.rows_inserted
    );

    report
}
