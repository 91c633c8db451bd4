use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::forecast::{ForecastPoint, ForecastResult};
use crate::model::observation::normalize_symbol;
use crate::store::{datetime_from_ms, ensure_parent_dir};

/// Forecasts generated this close to a new one for the same symbol are replaced.
pub const REPLACE_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredForecast {
    pub symbol: String,
    pub current_price: f64,
    pub generated_at: DateTime<Utc>,
    pub strategy: String,
    pub points: Vec<ForecastPoint>,
}

/// Flat table of forecast rows, one per (symbol, generation, minute).
pub struct SqliteForecastStore {
    conn: Connection,
}

impl SqliteForecastStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecast_prices (
                symbol TEXT NOT NULL,
                generated_at_ms INTEGER NOT NULL,
                forecast_minute INTEGER NOT NULL,
                forecast_timestamp_ms INTEGER NOT NULL,
                forecast_price REAL NOT NULL,
                current_price REAL NOT NULL,
                strategy TEXT NOT NULL,
                PRIMARY KEY(symbol, generated_at_ms, forecast_minute)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Store a result, dropping rows for the same symbol generated within the
    /// preceding [`REPLACE_WINDOW_MINUTES`]. Older generations are kept.
    pub fn persist(&mut self, result: &ForecastResult) -> Result<(), StoreError> {
        let symbol = normalize_symbol(&result.symbol);
        let generated_at_ms = result.generated_at.timestamp_millis();
        let cutoff_ms = (result.generated_at - Duration::minutes(REPLACE_WINDOW_MINUTES)).timestamp_millis();

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM forecast_prices WHERE symbol = ?1 AND generated_at_ms >= ?2",
            params![symbol, cutoff_ms],
        )?;
        for p in &result.forecasts {
            tx.execute(
                r#"
                INSERT INTO forecast_prices (
                    symbol, generated_at_ms, forecast_minute, forecast_timestamp_ms,
                    forecast_price, current_price, strategy
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    symbol,
                    generated_at_ms,
                    p.minute as i64,
                    p.timestamp.timestamp_millis(),
                    p.forecast_price,
                    result.current_price,
                    result.strategy.label(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn latest_forecast(&self, symbol: &str) -> Result<Option<StoredForecast>, StoreError> {
        let symbol = normalize_symbol(symbol);
        let latest: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(generated_at_ms) FROM forecast_prices WHERE symbol = ?1",
                params![symbol],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        let Some(generated_at_ms) = latest else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT forecast_minute, forecast_timestamp_ms, forecast_price, current_price, strategy
            FROM forecast_prices
            WHERE symbol = ?1 AND generated_at_ms = ?2
            ORDER BY forecast_minute ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![symbol, generated_at_ms], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut current_price = 0.0;
        let mut strategy = String::new();
        let mut points = Vec::with_capacity(rows.len());
        for (minute, ts_ms, price, current, label) in rows {
            current_price = current;
            strategy = label;
            points.push(ForecastPoint {
                minute: minute as u32,
                forecast_price: price,
                timestamp: datetime_from_ms(ts_ms)?,
            });
        }

        Ok(Some(StoredForecast {
            symbol,
            current_price,
            generated_at: datetime_from_ms(generated_at_ms)?,
            strategy,
            points,
        }))
    }

    /// Distinct generation times kept for `symbol`, oldest first.
    pub fn generations(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT generated_at_ms
            FROM forecast_prices
            WHERE symbol = ?1
            ORDER BY generated_at_ms ASC
            "#,
        )?;
        let ms = stmt
            .query_map(params![normalize_symbol(symbol)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ms.into_iter().map(datetime_from_ms).collect()
    }
}
