use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded price for a symbol, roughly one per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PriceObservation {
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Extract the price column of an ordered series.
pub fn prices_of(series: &[PriceObservation]) -> Vec<f64> {
    series.iter().map(|o| o.price).collect()
}

/// Normalize a symbol key: trimmed, lower-cased (coin ids such as `bitcoin`).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_lowercase()
}
