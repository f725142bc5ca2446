//! Boundary contracts for the remote side.
//!
//! [`CompletionStore`] is the authoritative per-day level store and
//! [`CatalogSource`] supplies the task catalog. Every call carries the
//! reference-zone date the caller considers "today", so both sides agree on
//! the day even around midnight.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::catalog::{ItemKey, Level, TaskCatalog};
use crate::day_record::StatusMap;
use crate::history::HistoryWindow;
use crate::sync::types::SyncError;

#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Authoritative levels for `date`. Tasks the remote does not report are
    /// simply absent.
    async fn today_status(&self, user: &str, date: NaiveDate) -> Result<StatusMap, SyncError>;

    /// Write one level. A non-success answer is [`SyncError::Rejected`].
    async fn set_level(
        &self,
        user: &str,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> Result<(), SyncError>;

    /// The `days` days ending at `end`, inclusive.
    async fn history(&self, user: &str, end: NaiveDate, days: u32)
        -> Result<HistoryWindow, SyncError>;

    async fn note(&self, user: &str, date: NaiveDate, task: &str)
        -> Result<Option<String>, SyncError>;

    /// Store a note; an empty string clears it.
    async fn set_note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
        note: &str,
    ) -> Result<(), SyncError>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn catalog(&self, user: &str) -> Result<TaskCatalog, SyncError>;
}
