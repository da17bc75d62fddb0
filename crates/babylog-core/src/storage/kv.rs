//! Minimal key-value store the persistence layer writes through.
//!
//! Any backend works (file, embedded database, browser storage) as long as a
//! single `set` either lands whole or fails.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use crate::error::{CoreError, PersistenceError};

pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    /// Returns whether a value was removed.
    fn delete(&mut self, key: &str) -> Result<bool, PersistenceError>;
}

/// In-process store. Used by tests and as the fallback when no durable store
/// can be opened.
///
/// `quota_bytes` and `fail_writes` emulate a full or broken backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
    fail_writes: bool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value exceeds `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota_bytes: Some(bytes),
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::WriteFailed {
                key: key.to_string(),
                message: "store is read-only".to_string(),
            });
        }
        if let Some(quota) = self.quota_bytes {
            if value.len() > quota {
                return Err(PersistenceError::WriteFailed {
                    key: key.to_string(),
                    message: format!("quota of {quota} bytes exceeded"),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// SQLite-backed store: one `kv` table in `babylog.db`.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Open the store at `~/.config/babylog/babylog.db`.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened.
    pub fn open_default() -> Result<Self, CoreError> {
        Self::open(&data_dir()?.join("babylog.db"))
    }

    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
    }
}

fn write_failed(key: &str, err: rusqlite::Error) -> PersistenceError {
    PersistenceError::WriteFailed {
        key: key.to_string(),
        message: err.to_string(),
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| PersistenceError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| write_failed(key, e))?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, PersistenceError> {
        let removed = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| write_failed(key, e))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_kv_store() {
        let mut store = SqliteKvStore::open_memory().unwrap();
        assert!(store.get("test").unwrap().is_none());
        store.set("test", "hello").unwrap();
        assert_eq!(store.get("test").unwrap().unwrap(), "hello");
        store.set("test", "again").unwrap();
        assert_eq!(store.get("test").unwrap().unwrap(), "again");
        assert!(store.delete("test").unwrap());
        assert!(!store.delete("test").unwrap());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        {
            let mut store = SqliteKvStore::open(&path).unwrap();
            store.set("k", "v").unwrap();
        }
        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn memory_store_quota_and_failure() {
        let mut store = MemoryKvStore::with_quota(4);
        assert!(store.set("a", "1234").is_ok());
        assert!(matches!(
            store.set("a", "12345"),
            Err(PersistenceError::WriteFailed { .. })
        ));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1234"));

        store.set_fail_writes(true);
        assert!(store.set("b", "x").is_err());
        assert!(!store.contains("b"));
    }
}
