// STORAGE: SQLite persistence for emitted signals
// The partial unique index on ACTIVE rows is the final authority for dedup.

use crate::error::StoreError;
use crate::types::{Signal, SignalKey, SignalStatus};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SIGNAL_COLUMNS: &str = "id, symbol, direction, timeframe, entry, stop_loss, take_profit, \
     atr, sl_multiplier, tp_multiplier, confidence, description, market_type, status, \
     candle_time, created_at, expires_at";

/// Result of a transactional check-and-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// An ACTIVE row already holds the key; carries its id
    Duplicate(String),
}

/// SQLite database for signal storage
#[derive(Clone)]
pub struct SignalStore {
    db: Arc<Mutex<Connection>>,
}

impl SignalStore {
    /// Create or open the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        info!(db_path = %path.display(), "STORAGE: database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Insert `signal` as ACTIVE unless its key already has an ACTIVE row.
    ///
    /// Check and insert share one transaction; a uniqueness violation from a
    /// concurrent writer is reported as a duplicate as well.
    pub async fn insert_if_absent(&self, signal: &Signal) -> Result<InsertOutcome, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        if let Some(id) = active_id(&tx, &signal.key())? {
            return Ok(InsertOutcome::Duplicate(id));
        }

        match insert_row(&tx, signal) {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                let id = active_id(&tx, &signal.key())?.ok_or_else(|| {
                    StoreError::Conflict(format!(
                        "unique violation for {} without an active row",
                        signal.symbol
                    ))
                })?;
                return Ok(InsertOutcome::Duplicate(id));
            }
            Err(e) => return Err(e),
        }
        tx.commit()?;

        debug!(
            id = %signal.id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            timeframe = %signal.timeframe,
            "STORAGE: signal inserted"
        );
        Ok(InsertOutcome::Inserted)
    }

    /// Plain insert; a second ACTIVE row for the same key fails with `Duplicate`.
    pub async fn insert_active(&self, signal: &Signal) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        insert_row(&db, signal)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Signal>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1");
        let row = db.query_row(&sql, params![id], SignalRow::read).optional()?;
        row.map(Signal::try_from).transpose()
    }

    pub async fn find_active(&self, key: &SignalKey) -> Result<Option<Signal>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals
             WHERE symbol = ?1 AND direction = ?2 AND timeframe = ?3 AND status = 'ACTIVE'"
        );
        let row = db
            .query_row(
                &sql,
                params![key.symbol, key.direction.as_str(), key.timeframe.as_str()],
                SignalRow::read,
            )
            .optional()?;
        row.map(Signal::try_from).transpose()
    }

    pub async fn count_active(&self, key: &SignalKey) -> Result<usize, StoreError> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM signals
             WHERE symbol = ?1 AND direction = ?2 AND timeframe = ?3 AND status = 'ACTIVE'",
            params![key.symbol, key.direction.as_str(), key.timeframe.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub async fn list_active(&self) -> Result<Vec<Signal>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals WHERE status = 'ACTIVE' ORDER BY created_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], SignalRow::read)?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(Signal::try_from(row?)?);
        }
        Ok(signals)
    }

    /// Move an ACTIVE signal to a terminal state.
    pub async fn update_status(&self, id: &str, to: SignalStatus) -> Result<(), StoreError> {
        if to == SignalStatus::Active {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: "ACTIVE".into(),
                to: to.as_str().into(),
            });
        }

        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE signals SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'ACTIVE'",
            params![to.as_str(), Utc::now().timestamp_millis(), id],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let current: Option<String> = db
            .query_row("SELECT status FROM signals WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match current {
            None => Err(StoreError::NotFound { id: id.to_string() }),
            Some(from) => Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from,
                to: to.as_str().into(),
            }),
        }
    }

    /// Mark every ACTIVE signal whose horizon has passed as EXPIRED.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let db = self.db.lock().await;
        let now_ms = now.timestamp_millis();
        let expired = db.execute(
            "UPDATE signals SET status = 'EXPIRED', updated_at = ?1
             WHERE status = 'ACTIVE' AND expires_at <= ?1",
            params![now_ms],
        )?;
        Ok(expired)
    }
}

/// Initialize database schema (create tables if they don't exist)
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            direction TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            entry REAL NOT NULL,
            stop_loss REAL NOT NULL,
            take_profit REAL NOT NULL,
            atr REAL NOT NULL,
            sl_multiplier REAL NOT NULL,
            tp_multiplier REAL NOT NULL,
            confidence REAL NOT NULL,
            description TEXT NOT NULL,
            market_type TEXT NOT NULL,
            status TEXT NOT NULL,
            candle_time INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_signals_active_key
            ON signals(symbol, direction, timeframe) WHERE status = 'ACTIVE';

        CREATE INDEX IF NOT EXISTS idx_signals_status_expires
            ON signals(status, expires_at);
        "#,
    )?;
    debug!("STORAGE: schema initialized");
    Ok(())
}

/// Id of the ACTIVE row holding `key`, if any.
fn active_id(conn: &Connection, key: &SignalKey) -> Result<Option<String>, StoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM signals
             WHERE symbol = ?1 AND direction = ?2 AND timeframe = ?3 AND status = 'ACTIVE'",
            params![key.symbol, key.direction.as_str(), key.timeframe.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn insert_row(conn: &Connection, signal: &Signal) -> Result<(), StoreError> {
    let result = conn.execute(
        &format!(
            "INSERT INTO signals ({SIGNAL_COLUMNS}, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            signal.id,
            signal.symbol,
            signal.direction.as_str(),
            signal.timeframe.as_str(),
            signal.entry,
            signal.stop_loss,
            signal.take_profit,
            signal.atr,
            signal.sl_multiplier,
            signal.tp_multiplier,
            signal.confidence,
            signal.description,
            signal.market_type.as_str(),
            signal.status.as_str(),
            signal.candle_time.timestamp_millis(),
            signal.created_at.timestamp_millis(),
            signal.expires_at.timestamp_millis(),
            signal.created_at.timestamp_millis(),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(StoreError::Duplicate {
                symbol: signal.symbol.clone(),
                direction: signal.direction.to_string(),
                timeframe: signal.timeframe.to_string(),
            })
        }
        Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::Conflict(
                msg.unwrap_or_else(|| format!("constraint violation inserting {}", signal.id)),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Row mapping
// ============================================================================

struct SignalRow {
    id: String,
    symbol: String,
    direction: String,
    timeframe: String,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
    atr: f64,
    sl_multiplier: f64,
    tp_multiplier: f64,
    confidence: f64,
    description: String,
    market_type: String,
    status: String,
    candle_time: i64,
    created_at: i64,
    expires_at: i64,
}

impl SignalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            symbol: row.get(1)?,
            direction: row.get(2)?,
            timeframe: row.get(3)?,
            entry: row.get(4)?,
            stop_loss: row.get(5)?,
            take_profit: row.get(6)?,
            atr: row.get(7)?,
            sl_multiplier: row.get(8)?,
            tp_multiplier: row.get(9)?,
            confidence: row.get(10)?,
            description: row.get(11)?,
            market_type: row.get(12)?,
            status: row.get(13)?,
            candle_time: row.get(14)?,
            created_at: row.get(15)?,
            expires_at: row.get(16)?,
        })
    }
}

fn ts(ms: i64, field: &str) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("{field} out of range: {ms}")))
}

impl TryFrom<SignalRow> for Signal {
    type Error = StoreError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        Ok(Signal {
            direction: row.direction.parse().map_err(StoreError::Corrupt)?,
            timeframe: row.timeframe.parse().map_err(StoreError::Corrupt)?,
            market_type: row.market_type.parse().map_err(StoreError::Corrupt)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            candle_time: ts(row.candle_time, "candle_time")?,
            created_at: ts(row.created_at, "created_at")?,
            expires_at: ts(row.expires_at, "expires_at")?,
            id: row.id,
            symbol: row.symbol,
            entry: row.entry,
            stop_loss: row.stop_loss,
            take_profit: row.take_profit,
            atr: row.atr,
            sl_multiplier: row.sl_multiplier,
            tp_multiplier: row.tp_multiplier,
            confidence: row.confidence,
            description: row.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MarketCategory, Timeframe};
    use chrono::Duration;

    fn signal(id: &str, direction: Direction) -> Signal {
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();
        Signal {
            id: id.into(),
            symbol: "BTCUSDT".into(),
            direction,
            timeframe: Timeframe::H4,
            entry: 50_000.0,
            stop_loss: 49_000.0,
            take_profit: 52_000.0,
            atr: 500.0,
            sl_multiplier: 2.0,
            tp_multiplier: 4.0,
            confidence: 0.875,
            description: "test".into(),
            market_type: MarketCategory::Major,
            status: SignalStatus::Active,
            candle_time: now - Duration::hours(4),
            created_at: now,
            expires_at: now + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn second_active_row_for_key_is_rejected() {
        let store = SignalStore::in_memory().unwrap();
        store.insert_active(&signal("a", Direction::Long)).await.unwrap();

        let err = store.insert_active(&signal("b", Direction::Long)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        // Opposite direction is a different key.
        store.insert_active(&signal("c", Direction::Short)).await.unwrap();
        assert_eq!(store.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reused_id_is_a_conflict_not_a_duplicate() {
        let store = SignalStore::in_memory().unwrap();
        store.insert_active(&signal("a", Direction::Long)).await.unwrap();

        let err = store
            .insert_active(&signal("a", Direction::Short))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");

        let err = store
            .insert_if_absent(&signal("a", Direction::Short))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn insert_if_absent_reports_the_holder() {
        let store = SignalStore::in_memory().unwrap();
        store.insert_active(&signal("a", Direction::Long)).await.unwrap();

        let outcome = store
            .insert_if_absent(&signal("b", Direction::Long))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate("a".into()));
    }

    #[tokio::test]
    async fn row_round_trips() {
        let store = SignalStore::in_memory().unwrap();
        let original = signal("a", Direction::Long);
        store.insert_active(&original).await.unwrap();

        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn only_active_rows_transition() {
        let store = SignalStore::in_memory().unwrap();
        store.insert_active(&signal("a", Direction::Long)).await.unwrap();

        store.update_status("a", SignalStatus::Executed).await.unwrap();
        let err = store
            .update_status("a", SignalStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = store
            .update_status("missing", SignalStatus::Expired)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        // Key is free again once the old row left ACTIVE.
        store.insert_active(&signal("b", Direction::Long)).await.unwrap();
    }

    #[tokio::test]
    async fn expire_stale_uses_stored_horizon() {
        let store = SignalStore::in_memory().unwrap();
        let s = signal("a", Direction::Long);
        store.insert_active(&s).await.unwrap();

        assert_eq!(store.expire_stale(s.expires_at - Duration::minutes(1)).await.unwrap(), 0);
        assert_eq!(store.expire_stale(s.expires_at).await.unwrap(), 1);
        assert_eq!(
            store.get("a").await.unwrap().unwrap().status,
            SignalStatus::Expired
        );
        assert!(store.list_active().await.unwrap().is_empty());
    }
}
