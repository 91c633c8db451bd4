pub mod forecast_store;
pub mod price_store;
pub mod snapshot;

pub use forecast_store::{SqliteForecastStore, StoredForecast};
pub use price_store::SqlitePriceStore;
pub use snapshot::JsonSnapshotSink;

use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub(crate) fn datetime_from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(StoreError::Timestamp(ms))
}

pub(crate) fn ensure_parent_dir(path: &std::path::Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
