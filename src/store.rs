use std::path::Path;

use log::debug;
use rusqlite::Connection;

use crate::candle::Candle;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS candles (
    market TEXT NOT NULL,
    time INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (market, time)
);
"#;

/// Owns all access to the persisted candle rows. One connection per run,
/// single writer.
pub struct CandleStore {
    conn: Connection,
}

impl CandleStore {
    /// Open (or create) the database and run idempotent schema initialization.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Latest stored candle time for a market, or `None` when no rows exist.
    /// This is the resume watermark; it is derived on demand, never cached.
    pub fn latest_time(&self, market: &str) -> Result<Option<i64>> {
        let max = self.conn.query_row(
            "SELECT MAX(time) FROM candles WHERE market = ?1",
            [market],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max)
    }

    /// Persist one page of candles, skipping rows whose `(market, time)` key
    /// already exists. The whole page commits in a single transaction, so a
    /// crash mid-write never leaves a partial page behind. Returns the number
    /// of rows actually inserted.
    pub fn save(&mut self, candles: &[Candle]) -> Result<usize> {
        debug!("inserting {} candles to db", candles.len());

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO candles (market, time, open, high, low, close, volume) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for candle in candles {
                inserted += stmt.execute((
                    &candle.market,
                    candle.time,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ))?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    #[cfg(test)]
    pub fn count(&self, market: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM candles WHERE market = ?1",
            [market],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
