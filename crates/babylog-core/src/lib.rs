//! # Babylog Core Library
//!
//! Session timer engine for the babylog tracker: a pair of left/right timers
//! per tracked entity, persisted continuously so an in-progress session
//! survives a restart or crash, plus the feeding-schedule calculation over
//! completed records. The `babylog` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timers**: wall-clock state machines. Elapsed time is always derived
//!   from timestamps, never accumulated from ticks
//! - **Sessions**: the manager owns every active session and its timer
//! - **Storage**: a key-value store (SQLite or in-memory) holding one JSON
//!   blob of active sessions, TOML configuration, SQLite completed records
//! - **Recovery**: validates the persisted blob at start and restores what
//!   can be trusted
//! - **Scheduler**: periodic duration updates and persistence, with host
//!   suspend/resume handling
//!
//! ## Key Components
//!
//! - [`DualTimer`]: two-sided session timer
//! - [`SessionManager`]: active-session registry and its lifecycle
//! - [`PersistenceStore`]: serialized session map over a [`KvStore`]
//! - [`RecoveryValidator`]: start-up validation of persisted sessions
//! - [`BackgroundScheduler`]: tick and persistence loop
//! - [`calculate_next_time`]: next expected feeding

pub mod clock;
pub mod error;
pub mod events;
pub mod recovery;
pub mod schedule;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, FinalizeError, PersistenceError, ValidationError};
pub use events::Event;
pub use recovery::{Integrity, RecoveryMethod, RecoveryOutcome, RecoveryRecord, RecoveryValidator};
pub use schedule::{calculate_next_time, CompletedEvent, EventKind, FeedingSchedule};
pub use scheduler::runner::{run, HostSignal, RunExit};
pub use scheduler::{BackgroundScheduler, SchedulerConfig};
pub use session::{CompletedSession, PersistedSession, SessionManager, SessionPatch};
pub use storage::{
    Config, FeedingLog, KvStore, MemoryKvStore, PersistenceStore, SqliteFeedingLog, SqliteKvStore,
};
pub use timer::{
    validate, Classification, DualTimer, Side, SideTimer, TimerPhase, ValidationLimits,
    ValidationReport,
};
