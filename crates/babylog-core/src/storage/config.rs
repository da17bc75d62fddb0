//! TOML-based application configuration.
//!
//! Stores engine tuning:
//! - Duration and persistence tick intervals
//! - Blob size and session age limits
//! - Session warning thresholds
//! - Feeding schedule interval
//!
//! Configuration is stored at `~/.config/babylog/config.toml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use super::persistence::DEFAULT_MAX_BLOB_BYTES;
use crate::error::ConfigError;
use crate::schedule::FeedingSchedule;
use crate::timer::ValidationLimits;

/// Background tick intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,
}

/// Durable store limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: usize,
    #[serde(default = "default_max_session_age_hours")]
    pub max_session_age_hours: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/babylog/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub validation: ValidationLimits,
    #[serde(default)]
    pub schedule: FeedingSchedule,
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_persist_interval_ms() -> u64 {
    5000
}
fn default_max_blob_bytes() -> usize {
    DEFAULT_MAX_BLOB_BYTES
}
fn default_max_session_age_hours() -> u64 {
    24
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            persist_interval_ms: default_persist_interval_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_blob_bytes: default_max_blob_bytes(),
            max_session_age_hours: default_max_session_age_hours(),
        }
    }
}

impl PersistenceConfig {
    /// Saturates at the largest representable duration.
    pub fn max_session_age(&self) -> Duration {
        i64::try_from(self.max_session_age_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.clone(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Using default configuration: {e}");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_default_values() {
        let cfg = Config::default();
        assert_eq!(cfg.timers.tick_interval_ms, 1000);
        assert_eq!(cfg.timers.persist_interval_ms, 5000);
        assert_eq!(cfg.persistence.max_blob_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.persistence.max_session_age(), Duration::hours(24));
        assert_eq!(cfg.validation.side_warning_secs, 3600);
        assert_eq!(cfg.validation.total_warning_secs, 7200);
        assert_eq!(cfg.schedule.interval_hours, 3.0);
        assert!(!cfg.schedule.include_solids);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[schedule]\ninterval_hours = 2.5\n").unwrap();
        assert_eq!(cfg.schedule.interval_hours, 2.5);
        assert_eq!(cfg.timers.tick_interval_ms, 1000);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timers.persist_interval_ms").as_deref(), Some("5000"));
        assert_eq!(cfg.get("schedule.include_solids").as_deref(), Some("false"));
        assert!(cfg.get("timers.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = Config::default();
        cfg.set("schedule.include_solids", "true").unwrap();
        cfg.set("schedule.interval_hours", "2.5").unwrap();
        cfg.set("validation.side_warning_secs", "1800").unwrap();
        assert!(cfg.schedule.include_solids);
        assert_eq!(cfg.schedule.interval_hours, 2.5);
        assert_eq!(cfg.validation.side_warning_secs, 1800);
    }

    #[test]
    fn huge_session_age_saturates() {
        let mut cfg = Config::default();
        cfg.set("persistence.max_session_age_hours", &u64::MAX.to_string()).unwrap();
        assert_eq!(cfg.persistence.max_session_age(), Duration::MAX);
        cfg.persistence.max_session_age_hours = 3_000_000_000_000_000;
        assert_eq!(cfg.persistence.max_session_age(), Duration::MAX);
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_type() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("schedule.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("schedule.include_solids", "not_a_bool"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn load_from_creates_default_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }
}
