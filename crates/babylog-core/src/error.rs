//! Core error types for babylog-core.
//!
//! Errors are returned as values across component boundaries. Nothing in the
//! session engine is fatal: the worst outcome is that a session could not be
//! saved or recovered, and that is reported to the caller.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::ValidationReport;

/// Core error type for babylog-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Durable store errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database errors from the SQLite-backed stores
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// A finalize that did not complete. The session stays active either way.
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("session rejected: {}", .0.errors.join("; "))]
    Rejected(ValidationReport),

    #[error("could not record session: {0}")]
    Record(#[from] CoreError),
}

/// Rule violations on durations, timestamps and session shape.
///
/// Always recoverable locally: the operation is rejected and no partial state
/// is committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Both sides are zero, so the session cannot be classified.
    #[error("at least one timer must have recorded time")]
    NothingRecorded,

    /// A side reported a negative duration.
    #[error("{side} duration cannot be negative")]
    NegativeDuration { side: String },

    /// The start time lies after the current time.
    #[error("start time cannot be in the future")]
    StartInFuture,

    /// The recorded durations do not fit between start time and now.
    #[error("session duration extends past the current time")]
    EndsInFuture,

    /// No active session exists for the entity.
    #[error("no active session for entity '{0}'")]
    UnknownEntity(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Failures against the durable key-value store.
///
/// On any of these the session manager keeps running from memory.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Serialized blob is above the configured limit; nothing was written.
    #[error("serialized sessions are {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// The store rejected the write. The key was cleared afterwards.
    #[error("failed to write key '{key}': {message}")]
    WriteFailed { key: String, message: String },

    /// The store could not be read.
    #[error("failed to read key '{key}': {message}")]
    ReadFailed { key: String, message: String },

    /// The stored value is not a readable session blob.
    #[error("stored value under '{key}' is corrupted: {message}")]
    Corrupted { key: String, message: String },

    /// The in-memory map could not be serialized.
    #[error("failed to serialize sessions: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
