//! Core error types for checkin-core.
//!
//! Every failure in the core degrades to "keep the last known good local
//! state". Nothing here is fatal to the process: callers surface
//! [`ValidationError`] and [`SyncError`] as recoverable notices and fall back
//! to the built-in catalog on [`ConfigError`].

use std::path::PathBuf;
use thiserror::Error;

pub use crate::sync::types::SyncError;

/// Core error type for checkin-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote synchronization errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

}

impl CoreError {
    /// Whether the error left local state exactly as it was before the call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Validation(_) | CoreError::Sync(_))
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),
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

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors. Raised before any mutation takes place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Task is not part of the catalog
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// Activity is not part of the task
    #[error("Unknown activity '{activity}' for task '{task}'")]
    UnknownActivity { task: String, activity: String },

    /// Task has activities but none was named
    #[error("Task '{0}' has activities; an activity must be given")]
    ActivityRequired(String),

    /// Level outside the declared range for the item
    #[error("Level {level} out of range for '{item}' (allowed 0..={max})")]
    LevelOutOfRange { item: String, level: u8, max: u8 },

    /// Malformed date key
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// User id is blank or contains `/`
    #[error("Invalid user id '{0}'")]
    InvalidUser(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::QueryFailed(err.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
