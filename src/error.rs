/// Errors produced while synchronizing klines.
///
/// Every error is local to one symbol's sync task; the driver records the
/// failure and keeps going with the remaining symbols.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("granularity mismatch: stored rows are {stored_ms}ms apart, batch rows are {batch_ms}ms apart")]
    GranularityMismatch { stored_ms: i64, batch_ms: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),

    #[error("symbol {0:?} cannot be used as a table identifier")]
    InvalidSymbol(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<rust_decimal::Error> for SyncError {
    fn from(err: rust_decimal::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<sea_orm::TryGetError> for SyncError {
    fn from(err: sea_orm::TryGetError) -> Self {
        SyncError::Storage(err.into())
    }
}
