//! Wire types and errors for the remote completion store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{ActivityId, Level, TaskId};

/// Body of a `set-level` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLevelRequest {
    /// `YYYY-MM-DD` in the reference zone
    pub date: NaiveDate,
    pub task: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityId>,
    pub level: Level,
}

/// Result of a write. `success: false` is a rejection, not a transport error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Note payload, used for both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub note: String,
}

/// Current sync status for one user session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last time reconcile finished (successfully or degraded).
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Whether reconcile has finished; level changes are refused before.
    pub reconciled: bool,
    /// Reconcile could not reach the remote; local cache is in use.
    pub degraded: bool,
    /// Remote writes currently in flight.
    pub in_flight: usize,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote rejected the request: {0}")]
    Rejected(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote did not answer in time")]
    Timeout,

    #[error("Malformed remote payload: {0}")]
    Malformed(String),

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local store error: {0}")]
    Storage(String),

    #[error("Changes are refused until today's state has been reconciled")]
    NotReconciled,

    #[error("Session is no longer active")]
    SessionInactive,
}

impl SyncError {
    /// Transport-level failure, as opposed to an explicit refusal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Unavailable(_) | SyncError::Timeout
        )
    }
}
