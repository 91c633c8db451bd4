use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::model::observation::{normalize_symbol, PriceObservation};
use crate::store::{datetime_from_ms, ensure_parent_dir};

/// Minute price observations per symbol, keyed by (symbol, timestamp).
pub struct SqlitePriceStore {
    conn: Connection,
}

impl SqlitePriceStore {
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
            CREATE TABLE IF NOT EXISTS price_observations (
                symbol TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                price REAL NOT NULL,
                PRIMARY KEY(symbol, timestamp_ms)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Upsert observations; a repeated (symbol, timestamp) keeps the latest price.
    pub fn record(&mut self, observations: &[PriceObservation]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        for o in observations {
            tx.execute(
                r#"
                INSERT INTO price_observations (symbol, timestamp_ms, price)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(symbol, timestamp_ms) DO UPDATE SET price = excluded.price
                "#,
                params![normalize_symbol(&o.symbol), o.timestamp_ms(), o.price],
            )?;
        }
        tx.commit()?;
        Ok(observations.len())
    }

    /// The newest `limit` observations for `symbol`, oldest first.
    pub fn load_series(&self, symbol: &str, limit: usize) -> Result<Vec<PriceObservation>, StoreError> {
        let symbol = normalize_symbol(symbol);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp_ms, price FROM (
                SELECT timestamp_ms, price
                FROM price_observations
                WHERE symbol = ?1
                ORDER BY timestamp_ms DESC
                LIMIT ?2
            )
            ORDER BY timestamp_ms ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![symbol, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(ms, price)| {
                Ok::<_, StoreError>(PriceObservation::new(
                    symbol.clone(),
                    datetime_from_ms(ms)?,
                    price,
                ))
            })
            .collect()
    }

    /// Symbols with the most recent activity first.
    pub fn tracked_symbols(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol
            FROM price_observations
            GROUP BY symbol
            ORDER BY MAX(timestamp_ms) DESC, symbol ASC
            LIMIT ?1
            "#,
        )?;
        let symbols = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(symbols)
    }
}
