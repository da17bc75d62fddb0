mod config;
pub mod device_id;
pub mod history;
pub mod kv;
pub mod persistence;

pub use config::{Config, PersistenceConfig, TimerConfig};
pub use device_id::{get_or_create_device_id, is_valid_device_id, DEVICE_ID_KEY};
pub use history::{FeedingLog, SqliteFeedingLog};
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
pub use persistence::{PersistenceStore, SessionBlob, SESSIONS_KEY};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/babylog[-dev]/` based on BABYLOG_ENV.
///
/// Set BABYLOG_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("BABYLOG_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("babylog-dev")
    } else {
        base_dir.join("babylog")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
