mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{CompletedSession, PersistedSession, SessionPatch, MAX_SESSION_SECS};
