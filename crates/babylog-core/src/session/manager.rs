//! Session manager.
//!
//! Owns the active sessions of every tracked entity, their live timers, and
//! the persistence store behind them. One instance per process; storage and
//! clock are injected so tests can run independent instances.
//!
//! ## Lifecycle
//!
//! ```ignore
//! let mut manager = SessionManager::new(store, SystemClock, &config);
//! let outcome = manager.initialize();   // once at start
//! manager.start_side("baby", Side::Left);
//! // ... background scheduler persists periodically ...
//! manager.cleanup();                    // once at exit, final flush
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::types::{CompletedSession, PersistedSession, SessionPatch};
use crate::clock::Clock;
use crate::error::{FinalizeError, PersistenceError, ValidationError};
use crate::events::Event;
use crate::recovery::{RecoveryOutcome, RecoveryRecord, RecoveryValidator};
use crate::storage::{get_or_create_device_id, Config, FeedingLog, KvStore, PersistenceStore};
use crate::timer::{DualTimer, Side, ValidationLimits, ValidationReport};

pub struct SessionManager<S: KvStore, C: Clock> {
    store: PersistenceStore<S>,
    timers: HashMap<String, DualTimer>,
    clock: C,
    limits: ValidationLimits,
    max_age: Duration,
}

impl<S: KvStore, C: Clock> SessionManager<S, C> {
    /// Create a manager over `store`. The device id is read from (or created
    /// in) the same store.
    pub fn new(mut store: S, clock: C, config: &Config) -> Self {
        let device_id = get_or_create_device_id(&mut store, clock.now());
        Self {
            store: PersistenceStore::new(store, device_id, config.persistence.max_blob_bytes),
            timers: HashMap::new(),
            clock,
            limits: config.validation.clone(),
            max_age: config.persistence.max_session_age(),
        }
    }

    pub fn with_defaults(store: S, clock: C) -> Self {
        Self::new(store, clock, &Config::default())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Restore persisted sessions. Run once at process start.
    pub fn initialize(&mut self) -> RecoveryOutcome {
        let now = self.clock.now();
        let raw = match self.store.load_raw() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Could not read persisted sessions: {e}");
                self.store.discard_stored();
                return RecoveryOutcome {
                    errors: vec![e.to_string()],
                    ..RecoveryOutcome::default()
                };
            }
        };

        let validator = RecoveryValidator::new(self.store.device_id(), self.max_age);
        let mut outcome = validator.recover(raw.as_deref(), now);
        if outcome.blob_corrupted {
            self.store.discard_stored();
        }

        for recovered in &outcome.sessions {
            let session = recovered.session.clone();
            self.timers.insert(
                session.entity_id.clone(),
                session.to_timer(recovered.stored_last_update),
            );
            self.store.insert(session);
        }
        for record in &outcome.records {
            self.store.record_recovery(record.clone());
        }

        let expired = self.clear_expired_sessions();
        if expired > 0 {
            outcome.recovered = outcome.recovered.saturating_sub(expired);
        } else {
            self.persist_logged();
        }

        tracing::info!(
            "Recovery finished: {} sessions restored, {} errors",
            outcome.recovered,
            outcome.errors.len()
        );
        outcome
    }

    /// Final flush. Run once at process end.
    pub fn cleanup(&mut self) -> Result<usize, PersistenceError> {
        let result = self.persist();
        if let Err(e) = &result {
            tracing::error!("Final flush failed: {e}");
        }
        result
    }

    /// Drop sessions older than the maximum age and re-persist when any were
    /// removed. Returns how many were dropped.
    pub fn clear_expired_sessions(&mut self) -> usize {
        let now = self.clock.now();
        let max_age = self.max_age;
        let removed = self.store.retain(|s| !s.is_expired(now, max_age));
        for entity in &removed {
            tracing::info!("Expired active session for {entity}");
            self.timers.remove(entity);
        }
        if !removed.is_empty() {
            self.persist_logged();
        }
        removed.len()
    }

    // ── Session contract ─────────────────────────────────────────────

    /// Insert (or overwrite) the session for its entity. Returns false when
    /// the session fails validation.
    pub fn add_active_session(&mut self, session: PersistedSession) -> bool {
        let now = self.clock.now();
        if let Err(e) = session.check(now, self.max_age) {
            tracing::warn!("Rejected session {}: {e}", session.session_id);
            return false;
        }
        let running_since = session.last_update.clamp(session.start_time, now);
        self.timers
            .insert(session.entity_id.clone(), session.to_timer(running_since));
        self.store.insert(session);
        self.persist_logged();
        true
    }

    pub fn remove_active_session(&mut self, entity_id: &str) -> bool {
        self.timers.remove(entity_id);
        let removed = self.store.remove(entity_id).is_some();
        if removed {
            self.persist_logged();
        }
        removed
    }

    /// Apply a partial update. Returns false for unknown entities or when the
    /// patched session fails validation; nothing is changed in that case.
    pub fn update_active_session(&mut self, entity_id: &str, patch: &SessionPatch) -> bool {
        let now = self.clock.now();
        let Some(mut updated) = self.get_active_session(entity_id) else {
            return false;
        };
        patch.apply_to(&mut updated);
        if let Err(e) = updated.check(now, self.max_age) {
            tracing::warn!("Rejected update for {entity_id}: {e}");
            return false;
        }
        updated.last_update = now;
        if patch.touches_timers() {
            let timer = self.rebuilt_timer(entity_id, &updated, now);
            self.timers.insert(entity_id.to_string(), timer);
        }
        self.store.insert(updated);
        self.persist_logged();
        true
    }

    /// Current view of an entity's session with live durations.
    pub fn get_active_session(&self, entity_id: &str) -> Option<PersistedSession> {
        let mut session = self.store.get(entity_id)?.clone();
        if let Some(timer) = self.timers.get(entity_id) {
            let now = self.clock.now();
            session.left_duration = timer.elapsed(Side::Left, now);
            session.right_duration = timer.elapsed(Side::Right, now);
            session.is_active = timer.any_running();
            if let Some(side) = timer.current_side() {
                session.current_side = side;
            }
        }
        Some(session)
    }

    pub fn has_active_sessions(&self) -> bool {
        !self.store.is_empty()
    }

    pub fn active_sessions(&self) -> Vec<PersistedSession> {
        self.store
            .sessions()
            .filter_map(|s| self.get_active_session(&s.entity_id))
            .collect()
    }

    // ── Timer control ────────────────────────────────────────────────

    /// Start or resume one side, creating the session if the entity has none.
    pub fn start_side(&mut self, entity_id: &str, side: Side) -> Option<Event> {
        let now = self.clock.now();
        if self.store.get(entity_id).is_none() {
            let session = PersistedSession::begin(entity_id, side, self.store.device_id(), now);
            tracing::info!("Started session {} for {entity_id}", session.session_id);
            self.store.insert(session);
            self.timers.insert(entity_id.to_string(), DualTimer::new());
        }
        let event = self.timers.entry(entity_id.to_string()).or_default().start(side, now);
        self.sync_entity(entity_id, now);
        self.persist_logged();
        event
    }

    pub fn pause_side(&mut self, entity_id: &str, side: Side) -> Result<Option<Event>, ValidationError> {
        let now = self.clock.now();
        let timer = self.timer_mut(entity_id)?;
        let event = timer.pause(side, now);
        self.sync_entity(entity_id, now);
        self.persist_logged();
        Ok(event)
    }

    /// Pause the other side and start `side`.
    pub fn switch_side(&mut self, entity_id: &str, side: Side) -> Result<Vec<Event>, ValidationError> {
        let now = self.clock.now();
        let events = self.timer_mut(entity_id)?.switch_to(side, now);
        self.sync_entity(entity_id, now);
        self.persist_logged();
        Ok(events)
    }

    /// Pause every running side of an entity.
    pub fn pause_all(&mut self, entity_id: &str) -> Result<Vec<Event>, ValidationError> {
        let now = self.clock.now();
        let timer = self.timer_mut(entity_id)?;
        let events = Side::BOTH
            .into_iter()
            .filter_map(|side| timer.pause(side, now))
            .collect();
        self.sync_entity(entity_id, now);
        self.persist_logged();
        Ok(events)
    }

    /// Live validation of an entity's session.
    pub fn validate_session(&self, entity_id: &str) -> ValidationReport {
        match self.timers.get(entity_id) {
            Some(timer) => timer.validate(self.clock.now(), &self.limits),
            None => ValidationReport::rejected(ValidationError::UnknownEntity(entity_id.to_string())),
        }
    }

    /// End a session. On success the completed record is returned for the
    /// external store and the session leaves active storage. On rejection the
    /// session stays active and untouched.
    pub fn finalize_session(
        &mut self,
        entity_id: &str,
        notes: Option<&str>,
    ) -> Result<CompletedSession, ValidationReport> {
        let completed = self.completed_record(entity_id, notes)?;
        self.close_finalized(entity_id, &completed);
        Ok(completed)
    }

    /// End a session and write it to `log`. The session leaves active storage
    /// only once the log has accepted the record; a rejected session or a
    /// failed write leaves it active and its timers running.
    pub fn finalize_into<L: FeedingLog + ?Sized>(
        &mut self,
        entity_id: &str,
        notes: Option<&str>,
        log: &mut L,
    ) -> Result<(i64, CompletedSession), FinalizeError> {
        let completed = self
            .completed_record(entity_id, notes)
            .map_err(FinalizeError::Rejected)?;
        let id = log.record_session(entity_id, &completed)?;
        self.close_finalized(entity_id, &completed);
        Ok((id, completed))
    }

    /// Copy live timer values into every stored session. Returns the
    /// `(entity, side, seconds)` triples of sides that are running.
    pub fn refresh_durations(&mut self) -> Vec<(String, Side, u64)> {
        let now = self.clock.now();
        let mut running = Vec::new();
        for session in self.store.sessions_mut() {
            if let Some(timer) = self.timers.get(&session.entity_id) {
                session.sync_from(timer, now);
                for side in timer.running_sides() {
                    running.push((session.entity_id.clone(), side, timer.elapsed(side, now)));
                }
            }
        }
        running
    }

    /// Refresh and write the full session map.
    pub fn persist(&mut self) -> Result<usize, PersistenceError> {
        self.refresh_durations();
        self.store.persist(self.clock.now())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn timer(&self, entity_id: &str) -> Option<&DualTimer> {
        self.timers.get(entity_id)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn device_id(&self) -> &str {
        self.store.device_id()
    }

    pub fn recovery_log(&self) -> &[RecoveryRecord] {
        self.store.recovery_log()
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    pub fn store(&self) -> &S {
        self.store.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.store.store_mut()
    }

    pub fn into_store(self) -> S {
        self.store.into_store()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn timer_mut(&mut self, entity_id: &str) -> Result<&mut DualTimer, ValidationError> {
        self.timers
            .get_mut(entity_id)
            .ok_or_else(|| ValidationError::UnknownEntity(entity_id.to_string()))
    }

    /// Timer for a patched session. Sides that were running keep running from
    /// the patched durations unless the patch cleared `is_active`; an active
    /// session with nothing running resumes its current side.
    fn rebuilt_timer(
        &self,
        entity_id: &str,
        session: &PersistedSession,
        now: DateTime<Utc>,
    ) -> DualTimer {
        let mut running: Vec<Side> = match self.timers.get(entity_id) {
            Some(timer) if session.is_active => timer.running_sides().collect(),
            _ => Vec::new(),
        };
        if session.is_active && running.is_empty() {
            running.push(session.current_side);
        }
        // The current side starts last so it stays current.
        running.sort_by_key(|side| *side == session.current_side);

        let mut timer = DualTimer::restored(
            session.start_time,
            session.left_duration,
            session.right_duration,
            session.current_side,
            None,
        );
        for side in running {
            timer.start(side, now);
        }
        timer
    }

    /// Finalize a copy of the entity's timer. The live timer is not touched.
    fn completed_record(
        &self,
        entity_id: &str,
        notes: Option<&str>,
    ) -> Result<CompletedSession, ValidationReport> {
        let session = self.store.get(entity_id).ok_or_else(|| {
            ValidationReport::rejected(ValidationError::UnknownEntity(entity_id.to_string()))
        })?;
        let notes = notes.unwrap_or(&session.notes);
        let mut timer = self.timers.get(entity_id).cloned().unwrap_or_default();
        timer.finalize(notes, self.clock.now(), &self.limits)
    }

    fn close_finalized(&mut self, entity_id: &str, completed: &CompletedSession) {
        tracing::info!(
            "Finalized session for {entity_id}: {}s ({})",
            completed.total_duration,
            completed.breast_used
        );
        self.remove_active_session(entity_id);
    }

    fn sync_entity(&mut self, entity_id: &str, now: DateTime<Utc>) {
        if let (Some(session), Some(timer)) =
            (self.store.get_mut(entity_id), self.timers.get(entity_id))
        {
            session.sync_from(timer, now);
        }
    }

    fn persist_logged(&mut self) {
        if let Err(e) = self.persist() {
            tracing::warn!("Continuing without durable sessions: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::CoreError;
    use crate::schedule::CompletedEvent;
    use crate::storage::{MemoryKvStore, SqliteFeedingLog, SESSIONS_KEY};
    use crate::timer::Classification;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn manager() -> (SessionManager<MemoryKvStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(t0());
        let mgr = SessionManager::with_defaults(MemoryKvStore::new(), clock.clone());
        (mgr, clock)
    }

    #[test]
    fn first_start_creates_session_and_persists() {
        let (mut mgr, clock) = manager();
        assert!(!mgr.has_active_sessions());
        assert!(mgr.start_side("baby", Side::Left).is_some());
        assert!(mgr.has_active_sessions());
        assert!(mgr.store().contains(SESSIONS_KEY));

        clock.advance_secs(42);
        let session = mgr.get_active_session("baby").unwrap();
        assert_eq!(session.left_duration, 42);
        assert!(session.is_active);
        assert_eq!(session.start_time, t0());
    }

    #[test]
    fn pause_unknown_entity_is_an_error() {
        let (mut mgr, _) = manager();
        assert_eq!(
            mgr.pause_side("nobody", Side::Left),
            Err(ValidationError::UnknownEntity("nobody".into()))
        );
    }

    #[test]
    fn finalize_removes_session_and_returns_payload() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Right);
        clock.advance_secs(600);
        mgr.update_active_session("baby", &SessionPatch::notes("good latch"));
        let done = mgr.finalize_session("baby", None).unwrap();
        assert_eq!(done.right_duration, 600);
        assert_eq!(done.breast_used, Classification::Right);
        assert_eq!(done.notes, "good latch");
        assert!(!mgr.has_active_sessions());
    }

    #[test]
    fn rejected_finalize_keeps_session() {
        let (mut mgr, _) = manager();
        mgr.start_side("baby", Side::Left);
        let report = mgr.finalize_session("baby", None).unwrap_err();
        assert_eq!(report.errors, vec!["at least one timer must have recorded time"]);
        assert!(mgr.has_active_sessions());
    }

    struct FailingLog;

    impl FeedingLog for FailingLog {
        fn record_session(&mut self, _: &str, _: &CompletedSession) -> Result<i64, CoreError> {
            Err(CoreError::Custom("database is locked".into()))
        }

        fn record_event(&mut self, _: &str, _: &CompletedEvent) -> Result<i64, CoreError> {
            Err(CoreError::Custom("database is locked".into()))
        }

        fn events(&self, _: &str) -> Result<Vec<CompletedEvent>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_log_write_keeps_session_running() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Left);
        clock.advance_secs(300);

        let err = mgr.finalize_into("baby", Some("sleepy"), &mut FailingLog).unwrap_err();
        assert!(matches!(err, FinalizeError::Record(_)));
        assert!(mgr.has_active_sessions());
        assert!(mgr.timer("baby").unwrap().is_running(Side::Left));

        clock.advance_secs(60);
        assert_eq!(mgr.get_active_session("baby").unwrap().left_duration, 360);

        let mut log = SqliteFeedingLog::open_memory().unwrap();
        let (id, done) = mgr.finalize_into("baby", Some("sleepy"), &mut log).unwrap();
        assert!(id > 0);
        assert_eq!(done.left_duration, 360);
        assert_eq!(done.notes, "sleepy");
        assert!(!mgr.has_active_sessions());
        assert_eq!(log.events("baby").unwrap().len(), 1);
    }

    #[test]
    fn rejected_finalize_into_writes_nothing() {
        let (mut mgr, _) = manager();
        mgr.start_side("baby", Side::Left);
        let mut log = SqliteFeedingLog::open_memory().unwrap();
        let err = mgr.finalize_into("baby", None, &mut log).unwrap_err();
        assert!(matches!(err, FinalizeError::Rejected(ref report) if !report.is_valid));
        assert!(log.events("baby").unwrap().is_empty());
        assert!(mgr.has_active_sessions());
    }

    #[test]
    fn duration_patch_keeps_both_sides_running() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Left);
        clock.advance_secs(10);
        mgr.start_side("baby", Side::Right);
        clock.advance_secs(20);

        let patch = SessionPatch {
            left_duration: Some(100),
            ..SessionPatch::default()
        };
        assert!(mgr.update_active_session("baby", &patch));
        let timer = mgr.timer("baby").unwrap();
        assert!(timer.is_running(Side::Left));
        assert!(timer.is_running(Side::Right));
        assert_eq!(timer.current_side(), Some(Side::Right));

        clock.advance_secs(5);
        let session = mgr.get_active_session("baby").unwrap();
        assert_eq!((session.left_duration, session.right_duration), (105, 25));
    }

    #[test]
    fn inactive_patch_pauses_every_side() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Left);
        mgr.start_side("baby", Side::Right);
        clock.advance_secs(30);
        let patch = SessionPatch {
            is_active: Some(false),
            ..SessionPatch::default()
        };
        assert!(mgr.update_active_session("baby", &patch));
        assert!(!mgr.timer("baby").unwrap().any_running());
        clock.advance_secs(30);
        let session = mgr.get_active_session("baby").unwrap();
        assert_eq!((session.left_duration, session.right_duration), (30, 30));
    }

    #[test]
    fn add_rejects_invalid_session() {
        let (mut mgr, _) = manager();
        let mut session = PersistedSession::begin("baby", Side::Left, mgr.device_id(), t0());
        session.start_time = t0() + Duration::hours(1);
        assert!(!mgr.add_active_session(session));
        assert!(!mgr.has_active_sessions());
    }

    #[test]
    fn update_rejects_unknown_and_oversized() {
        let (mut mgr, _) = manager();
        assert!(!mgr.update_active_session("baby", &SessionPatch::notes("x")));
        mgr.start_side("baby", Side::Left);
        let patch = SessionPatch {
            left_duration: Some(90_000),
            ..SessionPatch::default()
        };
        assert!(!mgr.update_active_session("baby", &patch));
    }

    #[test]
    fn sessions_are_independent_per_entity() {
        let (mut mgr, clock) = manager();
        mgr.start_side("twin-a", Side::Left);
        clock.advance_secs(10);
        mgr.start_side("twin-b", Side::Right);
        clock.advance_secs(10);
        assert!(mgr.remove_active_session("twin-a"));
        assert!(!mgr.remove_active_session("twin-a"));
        assert_eq!(mgr.get_active_session("twin-b").unwrap().right_duration, 10);
    }

    #[test]
    fn write_failures_do_not_stop_the_engine() {
        let (mut mgr, clock) = manager();
        mgr.store_mut().set_fail_writes(true);
        mgr.start_side("baby", Side::Left);
        assert!(mgr.is_degraded());
        clock.advance_secs(5);
        assert_eq!(mgr.get_active_session("baby").unwrap().left_duration, 5);
        assert!(mgr.cleanup().is_err());
    }
}
