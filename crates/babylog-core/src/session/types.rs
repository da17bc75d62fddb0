use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::timer::{Classification, DualTimer, Side};

/// Upper bound on `left + right` for any session, and on a session's age.
pub const MAX_SESSION_SECS: u64 = 24 * 60 * 60;

/// One in-progress session per tracked entity, as written to the local store.
///
/// `is_active` means the current side was running at `last_update`; recovery
/// resumes that side from `last_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub session_id: String,
    pub entity_id: String,
    pub start_time: DateTime<Utc>,
    pub current_side: Side,
    pub left_duration: u64,
    pub right_duration: u64,
    #[serde(default)]
    pub notes: String,
    pub last_update: DateTime<Utc>,
    pub device_id: String,
    pub is_active: bool,
}

impl PersistedSession {
    /// A fresh session for `entity_id` starting at `now`.
    pub fn begin(entity_id: &str, side: Side, device_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            start_time: now,
            current_side: side,
            left_duration: 0,
            right_duration: 0,
            notes: String::new(),
            last_update: now,
            device_id: device_id.to_string(),
            is_active: false,
        }
    }

    pub fn total_duration(&self) -> u64 {
        self.left_duration.saturating_add(self.right_duration)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.start_time
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Check the invariants required before a session is accepted.
    pub fn check(&self, now: DateTime<Utc>, max_age: Duration) -> Result<(), ValidationError> {
        if self.session_id.is_empty() {
            return Err(invalid("sessionId", "must not be empty"));
        }
        if self.entity_id.is_empty() {
            return Err(invalid("entityId", "must not be empty"));
        }
        if self.start_time > now {
            return Err(ValidationError::StartInFuture);
        }
        if self.is_expired(now, max_age) {
            return Err(invalid(
                "startTime",
                &format!("session is older than {} hours", max_age.num_hours()),
            ));
        }
        if self.total_duration() > MAX_SESSION_SECS {
            return Err(invalid("duration", "left + right exceeds 24 hours"));
        }
        Ok(())
    }

    /// Rebuild live timers from the recorded durations. Active sessions
    /// resume their current side from `running_since`.
    pub fn to_timer(&self, running_since: DateTime<Utc>) -> DualTimer {
        DualTimer::restored(
            self.start_time,
            self.left_duration,
            self.right_duration,
            self.current_side,
            self.is_active.then_some(running_since),
        )
    }

    /// Copy the live timer values into this record.
    pub fn sync_from(&mut self, timer: &DualTimer, now: DateTime<Utc>) {
        self.left_duration = timer.elapsed(Side::Left, now);
        self.right_duration = timer.elapsed(Side::Right, now);
        if let Some(side) = timer.current_side() {
            self.current_side = side;
        }
        self.is_active = timer.any_running();
        self.last_update = now;
    }
}

fn invalid(field: &str, message: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Partial update for an active session. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default)]
    pub current_side: Option<Side>,
    #[serde(default)]
    pub left_duration: Option<u64>,
    #[serde(default)]
    pub right_duration: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SessionPatch {
    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    /// Whether the patch changes anything the live timers depend on.
    pub fn touches_timers(&self) -> bool {
        self.current_side.is_some()
            || self.left_duration.is_some()
            || self.right_duration.is_some()
            || self.is_active.is_some()
    }

    pub fn apply_to(&self, session: &mut PersistedSession) {
        if let Some(side) = self.current_side {
            session.current_side = side;
        }
        if let Some(secs) = self.left_duration {
            session.left_duration = secs;
        }
        if let Some(secs) = self.right_duration {
            session.right_duration = secs;
        }
        if let Some(notes) = &self.notes {
            session.notes = notes.clone();
        }
        if let Some(active) = self.is_active {
            session.is_active = active;
        }
    }
}

/// Finalized session handed to the external record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub left_duration: u64,
    pub right_duration: u64,
    pub total_duration: u64,
    pub breast_used: Classification,
    pub notes: String,
}
