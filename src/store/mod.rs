//! Persistence engine: SQLite behind scoped read/write transactions.
//!
//! WAL mode gives readers snapshot consistency while a writer runs; write
//! scopes are `IMMEDIATE` transactions so all writers serialise at the
//! engine. Each committed scope that touched rows publishes the union of
//! affected date ranges on the change bus.

pub mod changes;
pub mod queries;

pub use changes::ChangeBus;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Result;
use crate::models::DateInterval;

/// Schema. Link-symmetry triggers keep the doubly-linked item pointers
/// mirrored: writing one side of a link repairs the other side inside the
/// same transaction. Trigger recursion stays off, so a repair never
/// cascades.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS timeline_item_base (
    id TEXT PRIMARY KEY,
    is_visit INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'recorder',
    previous_item_id TEXT,
    next_item_id TEXT,
    disabled INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    samples_changed INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_timeline_item_base_end_date
    ON timeline_item_base(end_date);

CREATE INDEX IF NOT EXISTS idx_timeline_item_base_start_date
    ON timeline_item_base(start_date);

CREATE TABLE IF NOT EXISTS timeline_item_visit (
    item_id TEXT PRIMARY KEY REFERENCES timeline_item_base(id),
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    radius REAL NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS timeline_item_trip (
    item_id TEXT PRIMARY KEY REFERENCES timeline_item_base(id),
    distance REAL,
    speed REAL,
    classified_activity_type TEXT,
    confirmed_activity_type TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS samples (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    horizontal_accuracy REAL,
    speed REAL,
    course REAL,
    altitude REAL,
    recording_state TEXT NOT NULL,
    classified_activity_type TEXT,
    confirmed_activity_type TEXT,
    timeline_item_id TEXT REFERENCES timeline_item_base(id),
    disabled INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_samples_timeline_item ON samples(timeline_item_id);
CREATE INDEX IF NOT EXISTS idx_samples_date ON samples(date);

CREATE TRIGGER IF NOT EXISTS timeline_item_link_next_au
AFTER UPDATE OF next_item_id ON timeline_item_base
WHEN NEW.next_item_id IS NOT NULL
BEGIN
    UPDATE timeline_item_base SET previous_item_id = NEW.id
    WHERE id = NEW.next_item_id
      AND (previous_item_id IS NULL OR previous_item_id != NEW.id);
END;

CREATE TRIGGER IF NOT EXISTS timeline_item_link_previous_au
AFTER UPDATE OF previous_item_id ON timeline_item_base
WHEN NEW.previous_item_id IS NOT NULL
BEGIN
    UPDATE timeline_item_base SET next_item_id = NEW.id
    WHERE id = NEW.previous_item_id
      AND (next_item_id IS NULL OR next_item_id != NEW.id);
END;

CREATE TRIGGER IF NOT EXISTS timeline_item_link_ai
AFTER INSERT ON timeline_item_base
BEGIN
    UPDATE timeline_item_base SET previous_item_id = NEW.id
    WHERE NEW.next_item_id IS NOT NULL AND id = NEW.next_item_id
      AND (previous_item_id IS NULL OR previous_item_id != NEW.id);
    UPDATE timeline_item_base SET next_item_id = NEW.id
    WHERE NEW.previous_item_id IS NOT NULL AND id = NEW.previous_item_id
      AND (next_item_id IS NULL OR next_item_id != NEW.id);
END;
"#;

/// Handle to the SQLite store plus its change bus. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    changes: ChangeBus,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes: ChangeBus::new(),
        })
    }

    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DateInterval> {
        self.changes.subscribe()
    }

    /// Scoped read. WAL readers see a consistent snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        let result = f(&conn);
        if let Err(e) = &result {
            warn!(error = %e, "read scope failed");
        }
        result
    }

    /// Scoped write inside one IMMEDIATE transaction. On success the
    /// union of touched date ranges is published; on failure the
    /// transaction rolls back and the error is logged here, at the scope
    /// boundary.
    pub fn write<T>(&self, f: impl for<'s> FnOnce(&mut WriteScope<'s>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut scope = WriteScope { tx, touched: None };
        let result = match f(&mut scope) {
            Ok(value) => {
                let WriteScope { tx, touched } = scope;
                tx.commit()?;
                Ok((value, touched))
            }
            Err(e) => {
                // Dropping the scope rolls the transaction back.
                drop(scope);
                warn!(error = %e, "write scope failed, rolling back");
                Err(e)
            }
        };
        match result {
            Ok((value, touched)) => {
                if let Some(range) = touched {
                    self.changes.publish(range);
                }
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }
}

/// A live write transaction that accumulates the date ranges it touches.
pub struct WriteScope<'a> {
    tx: Transaction<'a>,
    touched: Option<DateInterval>,
}

impl<'a> WriteScope<'a> {
    #[inline]
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Record a date range affected by this scope. Ranges union into one
    /// notification per commit.
    pub fn touch(&mut self, range: DateInterval) {
        self.touched = Some(match self.touched {
            Some(existing) => existing.union(&range),
            None => range,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimelineItemBase;
    use chrono::{TimeZone, Utc};

    #[test]
    fn write_scope_publishes_union_of_touched_ranges() {
        let db = Database::open_in_memory().unwrap();
        let mut rx = db.subscribe();

        let a = DateInterval::new(
            Utc.timestamp_opt(100, 0).unwrap(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );
        let b = DateInterval::new(
            Utc.timestamp_opt(50, 0).unwrap(),
            Utc.timestamp_opt(150, 0).unwrap(),
        );
        db.write(|scope| {
            scope.touch(a);
            scope.touch(b);
            Ok(())
        })
        .unwrap();

        let published = rx.try_recv().unwrap();
        assert_eq!(published.start, b.start);
        assert_eq!(published.end, a.end);
    }

    #[test]
    fn link_triggers_mirror_both_sides() {
        let db = Database::open_in_memory().unwrap();
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let end = Utc.timestamp_opt(100, 0).unwrap();
        let a = TimelineItemBase::new(true, start, end);
        let b = TimelineItemBase::new(false, end, Utc.timestamp_opt(200, 0).unwrap());

        db.write(|scope| {
            queries::save_base(scope, &a)?;
            queries::save_base(scope, &b)?;
            Ok(())
        })
        .unwrap();

        // Point a at b; the trigger should aim b back at a.
        db.write(|scope| {
            scope.conn().execute(
                "UPDATE timeline_item_base SET next_item_id = ?1 WHERE id = ?2",
                rusqlite::params![b.id, a.id],
            )?;
            Ok(())
        })
        .unwrap();

        let fetched = db
            .read(|conn| queries::get_base(conn, &b.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.previous_item_id.as_deref(), Some(a.id.as_str()));
    }
}
