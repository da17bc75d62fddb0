use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::Side;

/// Every state change in the engine produces an Event.
/// The UI renders from them; the CLI prints them as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SideStarted {
        side: Side,
        at: DateTime<Utc>,
    },
    SidePaused {
        side: Side,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SideResumed {
        side: Side,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// Displayed duration of a running side moved to a new whole second.
    DurationChanged {
        entity_id: String,
        side: Side,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SessionsPersisted {
        count: usize,
        at: DateTime<Utc>,
    },
    /// A persistence write failed; the engine keeps running from memory.
    PersistFailed {
        reason: String,
        at: DateTime<Utc>,
    },
    SchedulerStarted {
        at: DateTime<Utc>,
    },
    SchedulerStopped {
        at: DateTime<Utc>,
    },
    /// Host came back from suspension; durations were recomputed from wall clock.
    Resumed {
        suspended_secs: u64,
        at: DateTime<Utc>,
    },
}
