//! Active-session persistence.
//!
//! The whole `entity -> session` map is written as one JSON blob under
//! [`SESSIONS_KEY`]. Every write is a full snapshot, so a reader never sees one
//! entity's fields taken from two different moments. Writes are coalesced: the
//! next call simply supersedes the previous one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kv::KvStore;
use crate::error::PersistenceError;
use crate::recovery::RecoveryRecord;
use crate::session::PersistedSession;

pub const SESSIONS_KEY: &str = "babylog.active_sessions";

/// Default size limit for the serialized blob (5 MB).
pub const DEFAULT_MAX_BLOB_BYTES: usize = 5 * 1024 * 1024;

/// On-disk shape of the session blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlob {
    pub active_sessions: Vec<(String, PersistedSession)>,
    #[serde(default)]
    pub recovery_data: Vec<RecoveryRecord>,
    pub device_id: String,
    pub last_sync: DateTime<Utc>,
}

/// In-memory session map mirrored to a [`KvStore`].
pub struct PersistenceStore<S: KvStore> {
    store: S,
    sessions: BTreeMap<String, PersistedSession>,
    recovery_log: Vec<RecoveryRecord>,
    device_id: String,
    max_blob_bytes: usize,
    /// Set after a failed write; the map keeps working from memory.
    degraded: bool,
    last_sync: Option<DateTime<Utc>>,
}

impl<S: KvStore> PersistenceStore<S> {
    pub fn new(store: S, device_id: String, max_blob_bytes: usize) -> Self {
        Self {
            store,
            sessions: BTreeMap::new(),
            recovery_log: Vec::new(),
            device_id,
            max_blob_bytes,
            degraded: false,
            last_sync: None,
        }
    }

    // ── Map access ───────────────────────────────────────────────────

    /// Insert or overwrite the session for its entity.
    pub fn insert(&mut self, session: PersistedSession) -> Option<PersistedSession> {
        self.sessions.insert(session.entity_id.clone(), session)
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<PersistedSession> {
        self.sessions.remove(entity_id)
    }

    pub fn get(&self, entity_id: &str) -> Option<&PersistedSession> {
        self.sessions.get(entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut PersistedSession> {
        self.sessions.get_mut(entity_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PersistedSession> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PersistedSession> {
        self.sessions.values_mut()
    }

    /// Drop every session for which `keep` returns false.
    pub fn retain<F: FnMut(&PersistedSession) -> bool>(&mut self, mut keep: F) -> Vec<String> {
        let mut removed = Vec::new();
        self.sessions.retain(|entity, session| {
            let kept = keep(session);
            if !kept {
                removed.push(entity.clone());
            }
            kept
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn record_recovery(&mut self, record: RecoveryRecord) {
        self.recovery_log.push(record);
    }

    pub fn recovery_log(&self) -> &[RecoveryRecord] {
        &self.recovery_log
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ── Durable I/O ──────────────────────────────────────────────────

    /// Serialize the full map and write it.
    ///
    /// Oversized blobs are refused without touching the store. A failed write
    /// clears the key so no half-written value is left behind. Returns the
    /// number of sessions written.
    pub fn persist(&mut self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let blob = SessionBlob {
            active_sessions: self
                .sessions
                .iter()
                .map(|(entity, session)| (entity.clone(), session.clone()))
                .collect(),
            recovery_data: self.recovery_log.clone(),
            device_id: self.device_id.clone(),
            last_sync: now,
        };
        let json = serde_json::to_string(&blob)?;

        if json.len() > self.max_blob_bytes {
            tracing::warn!(
                "Refusing to persist {} sessions: {} bytes exceeds {} byte limit",
                blob.active_sessions.len(),
                json.len(),
                self.max_blob_bytes
            );
            return Err(PersistenceError::TooLarge {
                size: json.len(),
                limit: self.max_blob_bytes,
            });
        }

        if let Err(e) = self.store.set(SESSIONS_KEY, &json) {
            tracing::error!("Failed to persist active sessions: {e}");
            if let Err(cleanup) = self.store.delete(SESSIONS_KEY) {
                tracing::error!("Failed to clear partial session blob: {cleanup}");
            }
            self.degraded = true;
            return Err(e);
        }

        if self.degraded {
            tracing::info!("Session persistence restored");
        }
        self.degraded = false;
        self.last_sync = Some(now);
        tracing::debug!("Persisted {} active sessions", blob.active_sessions.len());
        Ok(blob.active_sessions.len())
    }

    /// Raw stored blob, if any.
    pub fn load_raw(&self) -> Result<Option<String>, PersistenceError> {
        self.store.get(SESSIONS_KEY)
    }

    /// Remove the stored blob, e.g. after it was found unreadable.
    pub fn discard_stored(&mut self) {
        if let Err(e) = self.store.delete(SESSIONS_KEY) {
            tracing::warn!("Failed to discard stored sessions: {e}");
        }
    }
}
