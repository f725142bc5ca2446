//! In-memory completion store.
//!
//! Behaves like a remote that lives in the same process. Failures can be
//! injected and writes can be held on the wire, which is how integration
//! tests drive rollback and supersession without a server.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Semaphore;

use crate::catalog::{ItemKey, Level, TaskCatalog, UserId};
use crate::day_record::{DayRecord, StatusMap};
use crate::history::{DateRange, HistoryWindow};
use crate::sync::remote::{CatalogSource, CompletionStore};
use crate::sync::types::SyncError;

/// One write that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub user: UserId,
    pub date: NaiveDate,
    pub item: ItemKey,
    pub level: Level,
}

#[derive(Default)]
struct Inner {
    days: HashMap<(UserId, NaiveDate), DayRecord>,
    notes: HashMap<(UserId, NaiveDate, String), String>,
    catalogs: HashMap<UserId, TaskCatalog>,
    offline: bool,
    failing_writes: u32,
    reject_writes: bool,
    latency: Option<Duration>,
    attempts: usize,
    writes: Vec<RecordedWrite>,
    gate: Option<Arc<Semaphore>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a whole day for `user`, replacing what was there.
    pub fn seed_day(&self, user: &str, record: DayRecord) {
        self.inner()
            .days
            .insert((user.to_string(), record.date()), record);
    }

    pub fn set_catalog(&self, user: &str, catalog: TaskCatalog) {
        self.inner().catalogs.insert(user.to_string(), catalog);
    }

    /// Every call fails with [`SyncError::Unavailable`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }

    /// The next `n` level or note writes fail with a transport error.
    pub fn fail_next_writes(&self, n: u32) {
        self.inner().failing_writes = n;
    }

    /// Answer writes with `success: false`.
    pub fn reject_writes(&self, reject: bool) {
        self.inner().reject_writes = reject;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner().latency = latency;
    }

    /// Writes arriving from now on wait until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.inner().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_writes(&self) {
        if let Some(gate) = self.inner().gate.take() {
            gate.close();
        }
    }

    /// Write calls received, including held and failed ones.
    pub fn attempts(&self) -> usize {
        self.inner().attempts
    }

    /// Level writes that were applied, oldest first.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner().writes.clone()
    }

    pub fn level(&self, user: &str, date: NaiveDate, item: &ItemKey) -> Level {
        self.inner()
            .days
            .get(&(user.to_string(), date))
            .map(|r| r.level_of(item))
            .unwrap_or(0)
    }

    /// Poll until `n` write calls have arrived.
    pub async fn wait_for_attempts(&self, n: usize) {
        while self.attempts() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn delay(&self) -> Result<(), SyncError> {
        let latency = self.inner().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner().offline {
            return Err(SyncError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Shared entry for writes: count, wait at the gate, then decide.
    async fn begin_write(&self) -> Result<(), SyncError> {
        let gate = {
            let mut inner = self.inner();
            inner.attempts += 1;
            inner.gate.clone()
        };
        if let Some(gate) = gate {
            // Closed on release; the error is the wake-up signal.
            let _ = gate.acquire().await;
        }
        self.delay().await?;

        let mut inner = self.inner();
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(SyncError::Unavailable("injected write failure".into()));
        }
        if inner.reject_writes {
            return Err(SyncError::Rejected("write refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionStore for MemoryStore {
    async fn today_status(&self, user: &str, date: NaiveDate) -> Result<StatusMap, SyncError> {
        self.delay().await?;
        Ok(self
            .inner()
            .days
            .get(&(user.to_string(), date))
            .map(DayRecord::to_status)
            .unwrap_or_default())
    }

    async fn set_level(
        &self,
        user: &str,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> Result<(), SyncError> {
        self.begin_write().await?;
        let mut inner = self.inner();
        inner
            .days
            .entry((user.to_string(), date))
            .or_insert_with(|| DayRecord::new(date))
            .put_level(item.clone(), level);
        inner.writes.push(RecordedWrite {
            user: user.to_string(),
            date,
            item: item.clone(),
            level,
        });
        Ok(())
    }

    async fn history(
        &self,
        user: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<HistoryWindow, SyncError> {
        self.delay().await?;
        let range = DateRange::ending(end, days);
        let inner = self.inner();
        let records: BTreeMap<NaiveDate, DayRecord> = inner
            .days
            .iter()
            .filter(|((u, d), _)| u == user && range.contains(*d))
            .map(|((_, d), r)| (*d, r.clone()))
            .collect();
        Ok(HistoryWindow::from_records(end, records.into_values()))
    }

    async fn note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
    ) -> Result<Option<String>, SyncError> {
        self.delay().await?;
        Ok(self
            .inner()
            .notes
            .get(&(user.to_string(), date, task.to_string()))
            .cloned())
    }

    async fn set_note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
        note: &str,
    ) -> Result<(), SyncError> {
        self.begin_write().await?;
        let key = (user.to_string(), date, task.to_string());
        let mut inner = self.inner();
        if note.trim().is_empty() {
            inner.notes.remove(&key);
        } else {
            inner.notes.insert(key, note.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn catalog(&self, user: &str) -> Result<TaskCatalog, SyncError> {
        self.delay().await?;
        Ok(self
            .inner()
            .catalogs
            .get(user)
            .cloned()
            .unwrap_or_else(TaskCatalog::builtin))
    }
}
