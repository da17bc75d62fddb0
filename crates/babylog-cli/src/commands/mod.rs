pub mod config;
pub mod feed;
pub mod recover;
pub mod session;
pub mod watch;

use babylog_core::{Config, CoreError, SessionManager, SqliteKvStore, SystemClock};
use serde::Serialize;

pub const DEFAULT_ENTITY: &str = "baby";

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub type Manager = SessionManager<SqliteKvStore, SystemClock>;

/// Open the session store and restore whatever survived the last run.
pub fn open_manager(config: &Config) -> Result<Manager, CoreError> {
    let store = SqliteKvStore::open_default()?;
    let mut manager = SessionManager::new(store, SystemClock, config);
    let outcome = manager.initialize();
    for error in &outcome.errors {
        tracing::warn!("Recovery: {error}");
    }
    Ok(manager)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
