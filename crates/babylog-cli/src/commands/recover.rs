use babylog_core::{Config, SessionManager, SqliteKvStore, SystemClock};
use serde_json::json;

use super::{print_json, CliResult};

pub fn run() -> CliResult {
    let config = Config::load_or_default();
    let store = SqliteKvStore::open_default()?;
    let mut manager = SessionManager::new(store, SystemClock, &config);
    let outcome = manager.initialize();

    print_json(&json!({
        "outcome": outcome,
        "recovery_log": manager.recovery_log(),
        "active_sessions": manager.active_sessions(),
        "device_id": manager.device_id(),
    }))?;

    manager.cleanup()?;
    Ok(())
}
