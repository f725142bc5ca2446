//! Optimistic sync engine for one user's day.
//!
//! Local state changes first and the remote write follows. A failed write
//! puts the last confirmed level back. Writes to the same item are funnelled
//! through a [`WriteQueue`] lane so only the newest intent ever reaches the
//! remote, and every completion checks that the session is still active
//! before touching state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{ItemKey, Level, TaskCatalog, TaskId, UserId};
use crate::clock::{Clock, ReferenceZone};
use crate::day_record::{toggled, DayRecord, StatusMap, TaskStatus};
use crate::error::{Result, ValidationError};
use crate::events::Event;
use crate::history::HistoryWindow;
use crate::session::SessionToken;
use crate::storage::LocalCache;
use crate::sync::remote::CompletionStore;
use crate::sync::types::{SyncError, SyncStatus};
use crate::sync::write_queue::{WriteKey, WriteQueue, WriteTicket};

/// Default bound on how long [`SyncEngine::reconcile`] waits for the remote.
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a remote write ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The remote accepted the newest intent.
    Confirmed,
    /// A newer change to the same item took over; this one was dropped or
    /// its result ignored.
    Superseded,
    /// The session ended or the day rolled over while the write was out.
    Discarded,
}

/// Result of a level change that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub item: ItemKey,
    pub previous: Level,
    pub level: Level,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub date: NaiveDate,
    /// Local values the remote overwrote.
    pub updated: usize,
    pub degraded: bool,
}

enum Intent {
    Set(Level),
    Toggle(Level),
}

impl Intent {
    fn requested(&self) -> Level {
        match self {
            Intent::Set(level) | Intent::Toggle(level) => *level,
        }
    }
}

struct EngineState {
    today: DayRecord,
    /// Last level known to be on the remote, per item with a write in flight
    /// or recently settled. Seeded lazily when a change is staged.
    confirmed_levels: HashMap<ItemKey, Level>,
    confirmed_notes: HashMap<TaskId, Option<String>>,
    reconciled: bool,
    degraded: bool,
    last_reconciled_at: Option<DateTime<Utc>>,
    events: Vec<Event>,
}

impl EngineState {
    fn new(today: DayRecord) -> Self {
        Self {
            today,
            confirmed_levels: HashMap::new(),
            confirmed_notes: HashMap::new(),
            reconciled: false,
            degraded: false,
            last_reconciled_at: None,
            events: Vec::new(),
        }
    }
}

/// Per-user sync engine. Share it behind an `Arc`; every method takes `&self`.
pub struct SyncEngine {
    user: UserId,
    catalog: Arc<TaskCatalog>,
    store: Arc<dyn CompletionStore>,
    cache: Option<Arc<LocalCache>>,
    clock: Arc<dyn Clock>,
    zone: ReferenceZone,
    session: SessionToken,
    reconcile_timeout: Duration,
    state: Mutex<EngineState>,
    queue: WriteQueue,
}

impl SyncEngine {
    pub fn new(
        user: impl Into<UserId>,
        catalog: Arc<TaskCatalog>,
        store: Arc<dyn CompletionStore>,
        clock: Arc<dyn Clock>,
        zone: ReferenceZone,
    ) -> Self {
        let today = zone.today(clock.as_ref());
        Self {
            user: user.into(),
            catalog,
            store,
            cache: None,
            clock,
            zone,
            session: SessionToken::new(),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            state: Mutex::new(EngineState::new(DayRecord::new(today))),
            queue: WriteQueue::new(),
        }
    }

    /// Attach the warm-start cache. A cached record for today becomes the
    /// initial local state until [`reconcile`](Self::reconcile) runs.
    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        match cache.load_today(&self.user) {
            Ok(Some(record)) => {
                let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
                if record.date() == state.today.date() {
                    debug!(user = %self.user, stars = record.total_stars(), "warm start from cache");
                    state.today = record;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(user = %self.user, error = %e, "failed to read local cache"),
        }
        self.cache = Some(cache);
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_session(mut self, session: SessionToken) -> Self {
        self.session = session;
        self
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    pub fn cache(&self) -> Option<&Arc<LocalCache>> {
        self.cache.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Today's date in the reference zone, rolling over first if needed.
    pub fn today(&self) -> NaiveDate {
        self.roll_over_if_needed();
        self.state().today.date()
    }

    /// Copy of today's local record.
    pub fn snapshot(&self) -> DayRecord {
        self.roll_over_if_needed();
        self.state().today.clone()
    }

    pub fn level(&self, task: &str, activity: Option<&str>) -> Level {
        self.state().today.level(task, activity)
    }

    pub fn is_reconciled(&self) -> bool {
        self.state().reconciled
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            last_reconciled_at: state.last_reconciled_at,
            reconciled: state.reconciled,
            degraded: state.degraded,
            in_flight: self.queue.in_flight(),
        }
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.state().events)
    }

    pub(crate) fn push_events(&self, events: impl IntoIterator<Item = Event>) {
        self.state().events.extend(events);
    }

    // ── Day boundary ─────────────────────────────────────────────────

    /// Start a fresh record when the reference date has moved past the one
    /// held. Pending intents for the old day are forgotten, so their results
    /// are ignored when they come back. Returns whether a rollover happened.
    pub fn roll_over_if_needed(&self) -> bool {
        let now = self.clock.now();
        let date = self.zone.date_of(now);
        {
            let mut state = self.state();
            let from = state.today.date();
            if date <= from {
                return false;
            }
            state.today = DayRecord::new(date);
            state.confirmed_levels.clear();
            state.confirmed_notes.clear();
            self.queue.clear();
            state.events.push(Event::DayRolledOver {
                user: self.user.clone(),
                from,
                to: date,
                at: now,
            });
            info!(user = %self.user, from = %from, to = %date, "day rolled over");
        }
        self.save_cache();
        true
    }

    // ── Reconcile ────────────────────────────────────────────────────

    /// Pull today's authoritative state. Every field the remote reports
    /// overwrites the local one; absent fields stay as they are. Items with
    /// a write still pending keep their local intent.
    ///
    /// An unreachable or slow remote does not block: the engine continues on
    /// local state and reports `degraded`. Either way level changes are
    /// accepted afterwards.
    ///
    /// # Errors
    /// Only [`SyncError::SessionInactive`].
    pub async fn reconcile(&self) -> std::result::Result<ReconcileReport, SyncError> {
        self.roll_over_if_needed();
        if !self.session.is_active() {
            return Err(SyncError::SessionInactive);
        }
        let date = self.state().today.date();

        let fetched = match tokio::time::timeout(
            self.reconcile_timeout,
            self.store.today_status(&self.user, date),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };

        if !self.session.is_active() {
            return Err(SyncError::SessionInactive);
        }

        let now = self.clock.now();
        let report = {
            let mut state = self.state();
            let (updated, degraded) = match fetched {
                Ok(_) if state.today.date() != date => {
                    debug!(user = %self.user, "day changed during reconcile, result dropped");
                    (0, true)
                }
                Ok(remote) => {
                    let remote = self.without_pending(remote);
                    let updated = state.today.merge_remote(&self.catalog, &remote);
                    state
                        .confirmed_levels
                        .retain(|item, _| self.queue.has_pending(&WriteKey::Level { item: item.clone() }));
                    (updated, false)
                }
                Err(e) => {
                    warn!(user = %self.user, error = %e, "reconcile failed, continuing on local cache");
                    (0, true)
                }
            };

            state.reconciled = true;
            state.degraded = degraded;
            state.last_reconciled_at = Some(now);
            state.events.push(Event::Reconciled {
                user: self.user.clone(),
                date,
                updated,
                degraded,
                at: now,
            });
            info!(user = %self.user, date = %date, updated, degraded, "reconciled");
            ReconcileReport {
                date,
                updated,
                degraded,
            }
        };

        self.save_cache();
        Ok(report)
    }

    fn without_pending(&self, remote: StatusMap) -> StatusMap {
        let pending = |task: &str, activity: Option<&str>| {
            self.queue.has_pending(&WriteKey::Level {
                item: ItemKey::new(task, activity),
            })
        };

        remote
            .into_iter()
            .filter_map(|(task, entry)| match entry {
                TaskStatus::Flat(_) if pending(&task, None) => None,
                TaskStatus::Flat(level) => Some((task, TaskStatus::Flat(level))),
                TaskStatus::Activities(map) => {
                    let map: std::collections::BTreeMap<_, _> = map
                        .into_iter()
                        .filter(|(activity, _)| !pending(&task, Some(activity)))
                        .collect();
                    Some((task, TaskStatus::Activities(map)))
                }
            })
            .collect()
    }

    fn ensure_ready(&self) -> std::result::Result<(), SyncError> {
        if !self.session.is_active() {
            return Err(SyncError::SessionInactive);
        }
        if !self.state().reconciled {
            return Err(SyncError::NotReconciled);
        }
        Ok(())
    }

    // ── Levels ───────────────────────────────────────────────────────

    /// Set an item's level locally, then write it to the remote.
    ///
    /// # Errors
    /// - [`ValidationError`] when the item or level is invalid; nothing changes.
    /// - [`SyncError::NotReconciled`] before the first reconcile.
    /// - Any other [`SyncError`] when the write failed; the local level has
    ///   already been put back to its last confirmed value.
    pub async fn apply_level_change(
        &self,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<LevelChange> {
        self.change_level(task, activity, Intent::Set(level)).await
    }

    /// Toggle rule on top of [`apply_level_change`](Self::apply_level_change):
    /// selecting the active level clears the item.
    pub async fn toggle_level(
        &self,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<LevelChange> {
        self.change_level(task, activity, Intent::Toggle(level)).await
    }

    async fn change_level(
        &self,
        task: &str,
        activity: Option<&str>,
        intent: Intent,
    ) -> Result<LevelChange> {
        self.roll_over_if_needed();
        self.ensure_ready()?;
        let item = ItemKey::new(task, activity);
        self.catalog.validate_level(&item, intent.requested())?;

        // Read-modify-write under one lock so concurrent toggles never
        // interleave.
        let (date, previous, level, ticket) = {
            let mut state = self.state();
            let previous = state.today.level_of(&item);
            let level = match intent {
                Intent::Set(level) => level,
                Intent::Toggle(level) => toggled(previous, level),
            };
            state.confirmed_levels.entry(item.clone()).or_insert(previous);
            state.today.put_level(item.clone(), level);
            let ticket = self.queue.stage(WriteKey::Level { item: item.clone() });
            state.events.push(Event::LevelChanged {
                user: self.user.clone(),
                task: item.task.clone(),
                activity: item.activity.clone(),
                from: previous,
                to: level,
                at: self.clock.now(),
            });
            debug!(user = %self.user, item = %item, from = previous, to = level, "level staged");
            (state.today.date(), previous, level, ticket)
        };
        self.save_cache();

        let outcome = self.send_level(&ticket, date, &item, level).await?;
        Ok(LevelChange {
            item,
            previous,
            level,
            outcome,
        })
    }

    async fn send_level(
        &self,
        ticket: &WriteTicket,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> std::result::Result<WriteOutcome, SyncError> {
        let Some(in_flight) = self.queue.acquire(ticket).await else {
            debug!(user = %self.user, item = %item, "superseded before sending");
            return Ok(WriteOutcome::Superseded);
        };
        let result = self.store.set_level(&self.user, date, item, level).await;
        drop(in_flight);

        if !self.session.is_active() {
            debug!(user = %self.user, item = %item, "session inactive, write result discarded");
            return Ok(WriteOutcome::Discarded);
        }

        {
            let mut state = self.state();
            if state.today.date() != date {
                return Ok(WriteOutcome::Discarded);
            }
            let current = self.queue.is_current(ticket);
            match &result {
                Ok(()) => {
                    state.confirmed_levels.insert(item.clone(), level);
                    if !current {
                        return Ok(WriteOutcome::Superseded);
                    }
                    self.queue.settle(ticket);
                    return Ok(WriteOutcome::Confirmed);
                }
                Err(e) if !current => {
                    debug!(user = %self.user, item = %item, error = %e, "superseded write failed, ignored");
                    return Ok(WriteOutcome::Superseded);
                }
                Err(e) => {
                    let restored = state.confirmed_levels.get(item).copied().unwrap_or(0);
                    state.today.put_level(item.clone(), restored);
                    self.queue.settle(ticket);
                    state.events.push(Event::LevelReverted {
                        user: self.user.clone(),
                        task: item.task.clone(),
                        activity: item.activity.clone(),
                        attempted: level,
                        restored,
                        reason: e.to_string(),
                        at: self.clock.now(),
                    });
                    warn!(user = %self.user, item = %item, error = %e, restored, "write failed, level rolled back");
                }
            }
        }
        self.save_cache();
        result.map(|()| WriteOutcome::Confirmed)
    }

    // ── Notes ────────────────────────────────────────────────────────

    fn require_task(&self, task: &str) -> std::result::Result<(), ValidationError> {
        self.catalog
            .task(task)
            .map(|_| ())
            .ok_or_else(|| ValidationError::UnknownTask(task.to_string()))
    }

    /// Today's note for `task`. Falls back to the local copy when the remote
    /// cannot be read.
    pub async fn note(&self, task: &str) -> Result<Option<String>> {
        self.roll_over_if_needed();
        self.require_task(task)?;
        let date = self.state().today.date();

        match self.store.note(&self.user, date, task).await {
            Ok(remote) => {
                if self.session.is_active() {
                    let mut state = self.state();
                    let pending = self.queue.has_pending(&WriteKey::Note {
                        task: task.to_string(),
                    });
                    if state.today.date() == date && !pending {
                        state.today.set_note(task, remote.clone());
                    }
                }
                Ok(remote)
            }
            Err(e) => {
                debug!(user = %self.user, task = %task, error = %e, "note read failed, using local copy");
                Ok(self.state().today.note(task).map(str::to_string))
            }
        }
    }

    /// Replace today's note for `task`; blank text clears it. Optimistic with
    /// rollback, like level changes.
    pub async fn set_note(&self, task: &str, note: &str) -> Result<WriteOutcome> {
        self.roll_over_if_needed();
        self.ensure_ready()?;
        self.require_task(task)?;
        let value = Some(note.trim().to_string()).filter(|n| !n.is_empty());

        let (date, ticket) = {
            let mut state = self.state();
            let previous = state.today.note(task).map(str::to_string);
            state
                .confirmed_notes
                .entry(task.to_string())
                .or_insert(previous);
            state.today.set_note(task, value.clone());
            let ticket = self.queue.stage(WriteKey::Note {
                task: task.to_string(),
            });
            state.events.push(Event::NoteChanged {
                user: self.user.clone(),
                task: task.to_string(),
                note: value.clone(),
                at: self.clock.now(),
            });
            (state.today.date(), ticket)
        };
        self.save_cache();

        let Some(in_flight) = self.queue.acquire(&ticket).await else {
            return Ok(WriteOutcome::Superseded);
        };
        let result = self
            .store
            .set_note(&self.user, date, task, value.as_deref().unwrap_or(""))
            .await;
        drop(in_flight);

        if !self.session.is_active() {
            return Ok(WriteOutcome::Discarded);
        }
        {
            let mut state = self.state();
            if state.today.date() != date {
                return Ok(WriteOutcome::Discarded);
            }
            let current = self.queue.is_current(&ticket);
            match &result {
                Ok(()) => {
                    state.confirmed_notes.insert(task.to_string(), value);
                    if !current {
                        return Ok(WriteOutcome::Superseded);
                    }
                    self.queue.settle(&ticket);
                    return Ok(WriteOutcome::Confirmed);
                }
                Err(_) if !current => return Ok(WriteOutcome::Superseded),
                Err(e) => {
                    let restored = state.confirmed_notes.get(task).cloned().flatten();
                    state.today.set_note(task, restored.clone());
                    self.queue.settle(&ticket);
                    state.events.push(Event::NoteChanged {
                        user: self.user.clone(),
                        task: task.to_string(),
                        note: restored,
                        at: self.clock.now(),
                    });
                    warn!(user = %self.user, task = %task, error = %e, "note write failed, rolled back");
                }
            }
        }
        self.save_cache();
        result.map(|()| WriteOutcome::Confirmed).map_err(Into::into)
    }

    // ── History ──────────────────────────────────────────────────────

    /// The `days` days ending today, as stored remotely. Today's entry is the
    /// remote view; overlay [`snapshot`](Self::snapshot) for the live one.
    pub async fn history(&self, days: u32) -> std::result::Result<HistoryWindow, SyncError> {
        let today = self.today();
        self.store.history(&self.user, today, days).await
    }

    fn save_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let record = self.state().today.clone();
        if let Err(e) = cache.save_today(&self.user, &record) {
            warn!(user = %self.user, error = %e, "failed to update local cache");
        }
    }
}
