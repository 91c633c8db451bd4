use thiserror::Error;

/// Errors raised by the per-symbol estimators (regressor and scaler).
///
/// None of these escape a forecast call: the generator maps every one of them
/// to a trend fallback. Training surfaces them to the service, which logs and
/// moves on to the next symbol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model has not been fitted yet")]
    NotFitted,

    #[error("dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("batch has {rows} rows but {targets} targets")]
    LengthMismatch { rows: usize, targets: usize },

    #[error("empty batch")]
    EmptyBatch,

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored timestamp {0}")]
    Timestamp(i64),
}
