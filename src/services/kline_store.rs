use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, Index, OnConflict, Order, Query, Table};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DeriveIden, QueryResult, Statement,
    TransactionTrait,
};

use crate::error::SyncError;
use crate::models::Candle;

/// Rows per INSERT statement inside an upsert transaction.
const INSERT_CHUNK_ROWS: usize = 250;

lazy_static! {
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Za-z0-9_]{1,64}$").unwrap();
}

/// Column set of a symbol table, in stored order.
#[derive(DeriveIden, Clone, Copy)]
enum KlineColumn {
    OpenTime,
    Open,
    High,
    Low,
    Close,
    Volume,
    CloseTime,
    QuoteAssetVolume,
    NumberOfTrades,
    Tbbav,
    Tbqav,
    Ignore,
}

const COLUMNS: [KlineColumn; 12] = [
    KlineColumn::OpenTime,
    KlineColumn::Open,
    KlineColumn::High,
    KlineColumn::Low,
    KlineColumn::Close,
    KlineColumn::Volume,
    KlineColumn::CloseTime,
    KlineColumn::QuoteAssetVolume,
    KlineColumn::NumberOfTrades,
    KlineColumn::Tbbav,
    KlineColumn::Tbqav,
    KlineColumn::Ignore,
];

/// Symbols become table names, so only plain identifier characters pass.
fn table_ident(symbol: &str) -> Result<Alias, SyncError> {
    if SYMBOL_RE.is_match(symbol) {
        Ok(Alias::new(symbol))
    } else {
        Err(SyncError::InvalidSymbol(symbol.to_string()))
    }
}

fn candle_from_row(row: &QueryResult) -> Result<Candle, SyncError> {
    let open_ms: i64 = row.try_get("", "open_time")?;
    let close_ms: i64 = row.try_get("", "close_time")?;
    let open_time = DateTime::from_timestamp_millis(open_ms).ok_or_else(|| {
        SyncError::Storage(sea_orm::DbErr::Custom(format!(
            "stored open time {} out of range",
            open_ms
        )))
    })?;
    let close_time = DateTime::from_timestamp_millis(close_ms).ok_or_else(|| {
        SyncError::Storage(sea_orm::DbErr::Custom(format!(
            "stored close time {} out of range",
            close_ms
        )))
    })?;

    Ok(Candle {
        open_time,
        open: row.try_get("", "open")?,
        high: row.try_get("", "high")?,
        low: row.try_get("", "low")?,
        close: row.try_get("", "close")?,
        volume: row.try_get("", "volume")?,
        close_time,
        quote_asset_volume: row.try_get("", "quote_asset_volume")?,
        number_of_trades: row.try_get("", "number_of_trades")?,
        taker_buy_base_volume: row.try_get("", "tbbav")?,
        taker_buy_quote_volume: row.try_get("", "tbqav")?,
        ignore: row.try_get("", "ignore")?,
    })
}

/// Per-symbol candle storage over one connection pool.
///
/// Each symbol gets its own table, created on first use. Times are stored as
/// integer epoch milliseconds so ordering survives every backend. Rows are
/// immutable once written: the composite `(open_time, close_time)` primary
/// key plus insert-or-ignore semantics make re-writing a range a no-op.
#[derive(Clone)]
pub struct KlineStore {
    db: DatabaseConnection,
}

impl KlineStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create the symbol's table and indexes if they are not there yet.
    pub async fn ensure_table(&self, symbol: &str) -> Result<(), SyncError> {
        let table = table_ident(symbol)?;
        let backend = self.db.get_database_backend();

        let create = Table::create()
            .table(table.clone())
            .if_not_exists()
            .col(ColumnDef::new(KlineColumn::OpenTime).big_integer().not_null())
            .col(ColumnDef::new(KlineColumn::Open).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::High).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::Low).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::Close).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::Volume).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::CloseTime).big_integer().not_null())
            .col(ColumnDef::new(KlineColumn::QuoteAssetVolume).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::NumberOfTrades).big_integer().not_null())
            .col(ColumnDef::new(KlineColumn::Tbbav).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::Tbqav).decimal().not_null())
            .col(ColumnDef::new(KlineColumn::Ignore).text().not_null())
            .primary_key(
                Index::create()
                    .col(KlineColumn::OpenTime)
                    .col(KlineColumn::CloseTime),
            )
            .to_owned();
        self.db.execute(backend.build(&create)).await?;

        let open_index = Index::create()
            .if_not_exists()
            .name(format!("ix_{}_open_time", symbol))
            .table(table.clone())
            .col(KlineColumn::OpenTime)
            .to_owned();
        self.db.execute(backend.build(&open_index)).await?;

        let close_index = Index::create()
            .if_not_exists()
            .name(format!("ix_{}_close_time", symbol))
            .table(table)
            .col(KlineColumn::CloseTime)
            .to_owned();
        self.db.execute(backend.build(&close_index)).await?;

        Ok(())
    }

    /// The resume cursor: max close time over every stored row, or `None`
    /// when the table is missing or empty.
    pub async fn latest_close_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let table = table_ident(symbol)?;
        if !self.table_exists(symbol).await? {
            return Ok(None);
        }

        let backend = self.db.get_database_backend();
        let select = Query::select()
            .expr_as(Expr::col(KlineColumn::CloseTime).max(), Alias::new("latest"))
            .from(table)
            .to_owned();

        let latest = match self.db.query_one(backend.build(&select)).await? {
            Some(row) => row.try_get::<Option<i64>>("", "latest")?,
            None => None,
        };

        Ok(latest.and_then(DateTime::from_timestamp_millis))
    }

    /// The most recent `limit` rows, ascending by open time. Empty when the
    /// table does not exist.
    pub async fn recent_candles(&self, symbol: &str, limit: u64) -> Result<Vec<Candle>, SyncError> {
        let table = table_ident(symbol)?;
        if !self.table_exists(symbol).await? {
            return Ok(Vec::new());
        }

        let backend = self.db.get_database_backend();
        let select = Query::select()
            .columns(COLUMNS)
            .from(table)
            .order_by(KlineColumn::OpenTime, Order::Desc)
            .limit(limit)
            .to_owned();

        let rows = self.db.query_all(backend.build(&select)).await?;
        let mut candles = rows
            .iter()
            .map(candle_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();

        Ok(candles)
    }

    /// Every stored row for `symbol`, ascending by open time.
    pub async fn candles(&self, symbol: &str) -> Result<Vec<Candle>, SyncError> {
        let table = table_ident(symbol)?;
        if !self.table_exists(symbol).await? {
            return Ok(Vec::new());
        }

        let backend = self.db.get_database_backend();
        let select = Query::select()
            .columns(COLUMNS)
            .from(table)
            .order_by(KlineColumn::OpenTime, Order::Asc)
            .to_owned();

        let rows = self.db.query_all(backend.build(&select)).await?;
        rows.iter().map(candle_from_row).collect()
    }

    /// Insert every row whose primary key is not already present; colliding
    /// rows are skipped, never overwritten. One transaction per batch.
    /// Returns the number of rows actually inserted.
    pub async fn upsert(&self, symbol: &str, batch: &[Candle]) -> Result<u64, SyncError> {
        if batch.is_empty() {
            return Ok(0);
        }

        self.ensure_table(symbol).await?;
        let table = table_ident(symbol)?;
        let backend = self.db.get_database_backend();

        let txn = self.db.begin().await?;
        let mut inserted = 0u64;

        for chunk in batch.chunks(INSERT_CHUNK_ROWS) {
            let mut insert = Query::insert();
            insert
                .into_table(table.clone())
                .columns(COLUMNS)
                .on_conflict(
                    OnConflict::columns([KlineColumn::OpenTime, KlineColumn::CloseTime])
                        .do_nothing()
                        .to_owned(),
                );

            for candle in chunk {
                insert.values_panic([
                    candle.open_time.timestamp_millis().into(),
                    candle.open.into(),
                    candle.high.into(),
                    candle.low.into(),
                    candle.close.into(),
                    candle.volume.into(),
                    candle.close_time.timestamp_millis().into(),
                    candle.quote_asset_volume.into(),
                    candle.number_of_trades.into(),
                    candle.taker_buy_base_volume.into(),
                    candle.taker_buy_quote_volume.into(),
                    candle.ignore.clone().into(),
                ]);
            }

            let result = txn.execute(backend.build(&insert)).await?;
            inserted += result.rows_affected();
        }

        txn.commit().await?;
        Ok(inserted)
    }

    async fn table_exists(&self, symbol: &str) -> Result<bool, SyncError> {
        let backend = self.db.get_database_backend();
        let stmt = match backend {
            DatabaseBackend::Sqlite => Statement::from_sql_and_values(
                backend,
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                vec![symbol.into()],
            ),
            DatabaseBackend::Postgres => Statement::from_sql_and_values(
                backend,
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_name = $1 AND table_schema = current_schema()",
                vec![symbol.into()],
            ),
            DatabaseBackend::MySql => Statement::from_sql_and_values(
                backend,
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_name = ? AND table_schema = DATABASE()",
                vec![symbol.into()],
            ),
        };

        Ok(self.db.query_one(stmt).await?.is_some())
    }
}
