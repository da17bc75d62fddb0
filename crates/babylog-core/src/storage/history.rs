//! Completed-record store.
//!
//! The session engine only hands finalized sessions to a [`FeedingLog`]; it
//! never reads them back except through the schedule calculator. The SQLite
//! implementation backs the CLI.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::data_dir;
use crate::error::CoreError;
use crate::schedule::{CompletedEvent, EventKind};
use crate::session::CompletedSession;

pub trait FeedingLog {
    /// Store a finalized nursing session.
    fn record_session(&mut self, entity_id: &str, session: &CompletedSession) -> Result<i64, CoreError>;

    /// Store a manually logged event (bottle, solids, diaper...).
    fn record_event(&mut self, entity_id: &str, event: &CompletedEvent) -> Result<i64, CoreError>;

    /// All events for an entity, most recent first.
    fn events(&self, entity_id: &str) -> Result<Vec<CompletedEvent>, CoreError>;
}

/// SQLite table of completed records.
pub struct SqliteFeedingLog {
    conn: Connection,
}

impl SqliteFeedingLog {
    /// Open the log at `~/.config/babylog/babylog.db`.
    pub fn open_default() -> Result<Self, CoreError> {
        Self::open(&data_dir()?.join("babylog.db"))
    }

    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;
        let log = Self { conn };
        log.migrate()?;
        Ok(log)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let log = Self { conn };
        log.migrate()?;
        Ok(log)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id      TEXT NOT NULL,
                kind           TEXT NOT NULL,
                at             TEXT NOT NULL,
                ended_at       TEXT,
                left_secs      INTEGER,
                right_secs     INTEGER,
                total_secs     INTEGER,
                breast_used    TEXT,
                notes          TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_records_entity_at ON records(entity_id, at);",
        )
    }
}

impl FeedingLog for SqliteFeedingLog {
    fn record_session(&mut self, entity_id: &str, session: &CompletedSession) -> Result<i64, CoreError> {
        self.conn.execute(
            "INSERT INTO records (entity_id, kind, at, ended_at, left_secs, right_secs, total_secs, breast_used, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entity_id,
                EventKind::Nursing.as_str(),
                session.start_time.to_rfc3339(),
                session.end_time.to_rfc3339(),
                session.left_duration as i64,
                session.right_duration as i64,
                session.total_duration as i64,
                session.breast_used.as_str(),
                session.notes,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_event(&mut self, entity_id: &str, event: &CompletedEvent) -> Result<i64, CoreError> {
        self.conn.execute(
            "INSERT INTO records (entity_id, kind, at) VALUES (?1, ?2, ?3)",
            params![entity_id, event.kind.as_str(), event.timestamp.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn events(&self, entity_id: &str) -> Result<Vec<CompletedEvent>, CoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, at FROM records WHERE entity_id = ?1")?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (kind, at) = row?;
            let (Ok(kind), Ok(at)) = (kind.parse::<EventKind>(), DateTime::parse_from_rfc3339(&at))
            else {
                tracing::warn!("Skipping unreadable record for {entity_id}: {kind} at {at}");
                continue;
            };
            events.push(CompletedEvent::new(kind, at.with_timezone(&Utc)));
        }
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }
}
