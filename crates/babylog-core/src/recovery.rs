//! Startup recovery of persisted sessions.
//!
//! The stored blob may come from an older schema, a write interrupted by a
//! crash, or manual editing. Each entry is checked on its own so one bad entry
//! never blocks the rest: failures become error strings and a `corrupted`
//! [`RecoveryRecord`], never an `Err`.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{PersistedSession, MAX_SESSION_SECS};
use crate::timer::{Classification, Side};

/// How a session came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    /// Restored as stored; no side was running.
    LocalStorage,
    /// A side was running at the last write and continues from wall-clock time.
    BackgroundTimer,
    /// Re-entered by the user.
    UserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrity {
    Complete,
    Partial,
    Corrupted,
}

/// Audit entry for one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub session_id: String,
    pub method: RecoveryMethod,
    pub integrity: Integrity,
    pub recovered_at: DateTime<Utc>,
}

/// A session that passed every check, plus the `lastUpdate` it was stored
/// with. Active sessions resume their running side from that instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredSession {
    pub session: PersistedSession,
    pub stored_last_update: DateTime<Utc>,
}

/// Summary of a recovery run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub recovered: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub sessions: Vec<RecoveredSession>,
    #[serde(skip)]
    pub records: Vec<RecoveryRecord>,
    /// The blob itself could not be read and should be discarded.
    #[serde(skip)]
    pub blob_corrupted: bool,
}

pub struct RecoveryValidator {
    device_id: String,
    max_age: Duration,
}

impl RecoveryValidator {
    pub fn new(device_id: impl Into<String>, max_age: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            max_age,
        }
    }

    /// Validate every entry of a stored blob. `None` means nothing was stored.
    pub fn recover(&self, raw: Option<&str>, now: DateTime<Utc>) -> RecoveryOutcome {
        let mut outcome = RecoveryOutcome::default();
        let Some(raw) = raw else {
            return outcome;
        };

        let entries = match parse_entries(raw) {
            Ok(entries) => entries,
            Err(message) => {
                tracing::warn!("Discarding unreadable session blob: {message}");
                outcome.errors.push(format!("stored sessions unreadable: {message}"));
                outcome.blob_corrupted = true;
                return outcome;
            }
        };

        let mut accepted = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            let label = entry_label(entry, index);
            let checked = self.check_entry(entry, now).and_then(|recovered| {
                if accepted.insert(recovered.session.entity_id.clone()) {
                    Ok(recovered)
                } else {
                    Err(format!(
                        "duplicate entry for entity {}",
                        recovered.session.entity_id
                    ))
                }
            });
            match checked {
                Ok(recovered) => {
                    let method = if recovered.session.is_active {
                        RecoveryMethod::BackgroundTimer
                    } else {
                        RecoveryMethod::LocalStorage
                    };
                    tracing::info!(
                        "Recovered session {} for {}",
                        recovered.session.session_id,
                        recovered.session.entity_id
                    );
                    outcome.records.push(RecoveryRecord {
                        session_id: recovered.session.session_id.clone(),
                        method,
                        integrity: Integrity::Complete,
                        recovered_at: now,
                    });
                    outcome.sessions.push(recovered);
                }
                Err(message) => {
                    tracing::warn!("Discarding session {label}: {message}");
                    outcome.errors.push(format!("session {label}: {message}"));
                    outcome.records.push(RecoveryRecord {
                        session_id: label,
                        method: RecoveryMethod::LocalStorage,
                        integrity: Integrity::Corrupted,
                        recovered_at: now,
                    });
                }
            }
        }

        outcome.recovered = outcome.sessions.len();
        outcome
    }

    /// Structural, temporal and numeric checks for one `[entityId, session]`
    /// entry. On success the session is stamped with this device and `now`.
    fn check_entry(&self, entry: &Value, now: DateTime<Utc>) -> Result<RecoveredSession, String> {
        let (key, fields) = split_entry(entry)?;

        // Structural
        let session_id = required_str(fields, "sessionId")?;
        let entity_id = required_str(fields, "entityId")?;
        let start_raw = required_str(fields, "startTime")?;
        required_str(fields, "deviceId")?;
        if let Some(key) = key {
            if key != entity_id {
                return Err(format!("key '{key}' does not match entityId '{entity_id}'"));
            }
        }
        let current_side = match fields.get("currentSide") {
            None | Some(Value::Null) => Side::Left,
            Some(Value::String(s)) => s.parse::<Side>()?,
            Some(other) => return Err(format!("currentSide must be a string, got {other}")),
        };
        if let Some(value) = fields.get("breastUsed") {
            let valid = value
                .as_str()
                .is_some_and(|s| s.parse::<Classification>().is_ok());
            if !valid {
                return Err(format!("breastUsed must be left, right or both, got {value}"));
            }
        }
        let is_active = optional_bool(fields, "isActive")?;
        let notes = match fields.get("notes") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(format!("notes must be a string, got {other}")),
        };

        // Temporal
        let start_time = parse_instant(start_raw)
            .ok_or_else(|| format!("startTime '{start_raw}' is not a valid timestamp"))?;
        if start_time > now {
            return Err("startTime is in the future".to_string());
        }
        let age = now - start_time;
        if age > self.max_age {
            return Err(format!(
                "session is {} hours old, older than the {} hour limit",
                age.num_hours(),
                self.max_age.num_hours()
            ));
        }
        let stored_last_update = match fields.get("lastUpdate").and_then(Value::as_str) {
            Some(raw) => parse_instant(raw)
                .ok_or_else(|| format!("lastUpdate '{raw}' is not a valid timestamp"))?,
            None => start_time,
        }
        .clamp(start_time, now);

        // Numeric
        let left = duration_field(fields, "leftDuration")?;
        let right = duration_field(fields, "rightDuration")?;
        if left + right > MAX_SESSION_SECS as f64 {
            return Err(format!(
                "total duration {}s exceeds {MAX_SESSION_SECS}s",
                left + right
            ));
        }

        Ok(RecoveredSession {
            session: PersistedSession {
                session_id: session_id.to_string(),
                entity_id: entity_id.to_string(),
                start_time,
                current_side,
                left_duration: left.floor() as u64,
                right_duration: right.floor() as u64,
                notes,
                last_update: now,
                device_id: self.device_id.clone(),
                is_active,
            },
            stored_last_update,
        })
    }
}

fn parse_entries(raw: &str) -> Result<Vec<Value>, String> {
    let root: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    match root.get("active_sessions") {
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(other) => Err(format!("active_sessions must be an array, got {other}")),
        None => Err("missing active_sessions".to_string()),
    }
}

/// Entries are `[entityId, session]` pairs; a bare session object is accepted
/// from older writers.
fn split_entry(entry: &Value) -> Result<(Option<&str>, &Map<String, Value>), String> {
    match entry {
        Value::Array(pair) if pair.len() == 2 => {
            let key = pair[0]
                .as_str()
                .ok_or_else(|| "entry key must be a string".to_string())?;
            let fields = pair[1]
                .as_object()
                .ok_or_else(|| "entry value must be an object".to_string())?;
            Ok((Some(key), fields))
        }
        Value::Object(fields) => Ok((None, fields)),
        _ => Err("entry must be an [entityId, session] pair".to_string()),
    }
}

fn entry_label(entry: &Value, index: usize) -> String {
    split_entry(entry)
        .ok()
        .and_then(|(_, fields)| fields.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"))
}

fn required_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a str, String> {
    match fields.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(format!("{name} is empty")),
        Some(other) => Err(format!("{name} must be a string, got {other}")),
        None => Err(format!("missing {name}")),
    }
}

fn optional_bool(fields: &Map<String, Value>, name: &str) -> Result<bool, String> {
    match fields.get(name) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(format!("{name} must be a boolean, got {other}")),
    }
}

fn duration_field(fields: &Map<String, Value>, name: &str) -> Result<f64, String> {
    let value = fields.get(name).ok_or_else(|| format!("missing {name}"))?;
    match value.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        Some(secs) => Err(format!("{name} must be non-negative, got {secs}")),
        None => Err(format!("{name} must be a number, got {value}")),
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
