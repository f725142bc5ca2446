//! Per-user sessions and the manager that switches between them.
//!
//! There is no process-wide "current user". A [`SessionManager`] owns at
//! most one active [`UserSession`]; switching users tears the old one down
//! and deactivates its [`SessionToken`] so writes still on the wire finish
//! without touching anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::achievements::{AchievementEngine, AchievementLedger, AchievementSnapshot};
use crate::aggregate::{AggregationEngine, PeriodSummary, RollupPeriod};
use crate::catalog::{validate_user_id, Level, TaskCatalog, UserId};
use crate::clock::{Clock, ReferenceZone};
use crate::error::{ConfigError, Result};
use crate::history::{DateRange, HistoryWindow};
use crate::storage::{Config, LocalCache};
use crate::streak::{StreakCalculator, StreakConfig, StreakSummary};
use crate::sync::engine::{LevelChange, ReconcileReport, SyncEngine, WriteOutcome, DEFAULT_RECONCILE_TIMEOUT};
use crate::sync::remote::{CatalogSource, CompletionStore};
use crate::sync::types::SyncError;

/// Liveness flag shared by a session and everything it spawned.
#[derive(Debug, Clone)]
pub struct SessionToken {
    active: Arc<AtomicBool>,
}

impl SessionToken {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs shared by every session a manager creates.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub zone: ReferenceZone,
    pub streak: StreakConfig,
    pub achievements: AchievementEngine,
    pub reconcile_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            zone: ReferenceZone::utc(),
            streak: StreakConfig::default(),
            achievements: AchievementEngine::default(),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            zone: config.zone()?,
            streak: config.streak_config(),
            achievements: config.achievement_engine(),
            reconcile_timeout: config.reconcile_timeout(),
        })
    }
}

/// Everything one user needs: the sync engine plus derived views.
pub struct UserSession {
    engine: Arc<SyncEngine>,
    achievements: AchievementEngine,
    streak: StreakConfig,
    ledger: Mutex<AchievementLedger>,
    /// Fetched once per day and shared by streaks and rollups.
    history: Mutex<Option<HistoryWindow>>,
}

impl UserSession {
    pub fn new(engine: SyncEngine, achievements: AchievementEngine, streak: StreakConfig) -> Self {
        let ledger = match engine.cache() {
            Some(cache) => cache.load_ledger(engine.user()).unwrap_or_else(|e| {
                warn!(user = %engine.user(), error = %e, "failed to load achievement ledger");
                AchievementLedger::new()
            }),
            None => AchievementLedger::new(),
        };
        Self {
            engine: Arc::new(engine),
            achievements,
            streak,
            ledger: Mutex::new(ledger),
            history: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn user(&self) -> &str {
        self.engine.user()
    }

    pub fn ledger(&self) -> AchievementLedger {
        self.lock_ledger().clone()
    }

    fn lock_ledger(&self) -> MutexGuard<'_, AchievementLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_history(&self) -> MutexGuard<'_, Option<HistoryWindow>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reconcile with the remote, then evaluate achievements on the result.
    pub async fn start(&self) -> std::result::Result<ReconcileReport, SyncError> {
        let report = self.engine.reconcile().await?;
        self.evaluate_achievements().await;
        Ok(report)
    }

    pub async fn apply_level_change(
        &self,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<LevelChange> {
        let change = self.engine.apply_level_change(task, activity, level).await?;
        self.evaluate_achievements().await;
        Ok(change)
    }

    pub async fn toggle_level(
        &self,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<LevelChange> {
        let change = self.engine.toggle_level(task, activity, level).await?;
        self.evaluate_achievements().await;
        Ok(change)
    }

    pub async fn set_note(&self, task: &str, note: &str) -> Result<WriteOutcome> {
        self.engine.set_note(task, note).await
    }

    /// Days needed so both the streak walk and a full calendar year fit.
    fn history_span(&self) -> u32 {
        (self.streak.max_lookback_days + 1).max(366)
    }

    /// The shared history window ending today. Fetched once per day; a
    /// failed fetch yields an empty window and is retried next time.
    pub async fn history(&self) -> HistoryWindow {
        let today = self.engine.today();
        if let Some(cached) = self.lock_history().as_ref() {
            if cached.end() == today {
                return cached.clone();
            }
        }

        match self.engine.history(self.history_span()).await {
            Ok(window) => {
                debug!(user = %self.user(), days = window.len(), "history loaded");
                *self.lock_history() = Some(window.clone());
                window
            }
            Err(e) => {
                warn!(user = %self.user(), error = %e, "history unavailable, treating past days as empty");
                HistoryWindow::empty(today)
            }
        }
    }

    /// Drop the shared window so the next view fetches it again.
    pub fn invalidate_history(&self) {
        *self.lock_history() = None;
    }

    pub async fn streak(&self) -> StreakSummary {
        let history = self.history().await;
        let today = self.engine.snapshot();
        StreakCalculator::with_config(self.engine.catalog(), self.streak).summary(&history, &today)
    }

    /// Rolling window of `period` days ending today.
    pub async fn rollup(&self, period: RollupPeriod) -> PeriodSummary {
        let history = self.history().await;
        let today = self.engine.snapshot();
        self.aggregation().rollup(period, &history, &today)
    }

    /// Calendar day, ISO week, month or year containing today.
    pub async fn calendar(&self, period: RollupPeriod) -> PeriodSummary {
        let history = self.history().await;
        let today = self.engine.snapshot();
        let engine = self.aggregation();
        let date = today.date();
        match period {
            RollupPeriod::Day => engine.summarize(
                date.to_string(),
                DateRange::new(date, date),
                &history,
                Some(&today),
            ),
            RollupPeriod::Week => engine.calendar_week(date, &history, Some(&today)),
            RollupPeriod::Month => engine.calendar_month(date, &history, Some(&today)),
            RollupPeriod::Year => engine.calendar_year(date, &history, Some(&today)),
        }
    }

    /// The calendar period containing today split into ISO weeks (month) or
    /// months (year). A day or week comes back as a single entry.
    pub async fn breakdown(&self, period: RollupPeriod) -> Vec<PeriodSummary> {
        let whole = self.calendar(period).await;
        let history = self.history().await;
        let today = self.engine.snapshot();
        let engine = self.aggregation();
        match period {
            RollupPeriod::Month => engine.weekly_breakdown(whole.range, &history, Some(&today)),
            RollupPeriod::Year => engine.monthly_breakdown(whole.range, &history, Some(&today)),
            RollupPeriod::Day | RollupPeriod::Week => vec![whole],
        }
    }

    fn aggregation(&self) -> AggregationEngine<'_> {
        AggregationEngine::new(self.engine.catalog()).with_rule(self.streak.rule)
    }

    /// Fire every achievement whose predicate now holds. Never fails; the
    /// notifications are queued on the engine alongside its own events.
    pub async fn evaluate_achievements(&self) -> usize {
        let history = self.history().await;
        let today = self.engine.snapshot();
        let calculator = StreakCalculator::with_config(self.engine.catalog(), self.streak);
        let snapshot = AchievementSnapshot {
            stars_today: today.total_stars(),
            all_tasks_today: self.streak.rule.is_day_complete(self.engine.catalog(), &today),
            streak: calculator.current_streak(&history, &today),
        };

        let fired = {
            let mut ledger = self.lock_ledger();
            let fired =
                self.achievements
                    .evaluate(self.user(), &mut ledger, &snapshot, self.engine.now());
            if !fired.is_empty() {
                if let Some(cache) = self.engine.cache() {
                    if let Err(e) = cache.save_ledger(self.user(), &ledger) {
                        warn!(user = %self.user(), error = %e, "failed to persist achievement ledger");
                    }
                }
            }
            fired
        };
        let count = fired.len();
        self.engine.push_events(fired);
        count
    }

    fn close(&self) {
        self.engine.session().deactivate();
    }
}

/// Owns the active user's session and builds new ones on switch.
pub struct SessionManager {
    store: Arc<dyn CompletionStore>,
    catalogs: Option<Arc<dyn CatalogSource>>,
    fallback_catalog: Arc<TaskCatalog>,
    cache: Option<Arc<LocalCache>>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    active: Option<Arc<UserSession>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CompletionStore>,
        fallback_catalog: TaskCatalog,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            catalogs: None,
            fallback_catalog: Arc::new(fallback_catalog),
            cache: None,
            clock,
            settings,
            active: None,
        }
    }

    /// Ask `source` for each user's catalog before falling back.
    pub fn with_catalog_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.catalogs = Some(source);
        self
    }

    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn active(&self) -> Option<&Arc<UserSession>> {
        self.active.as_ref()
    }

    pub fn active_user(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.user())
    }

    async fn catalog_for(&self, user: &str) -> Arc<TaskCatalog> {
        let Some(source) = &self.catalogs else {
            return Arc::clone(&self.fallback_catalog);
        };
        match source.catalog(user).await {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                warn!(user = %user, error = %e, "catalog unavailable, using fallback");
                Arc::clone(&self.fallback_catalog)
            }
        }
    }

    /// Make `user` the active user. The previous session is closed first;
    /// switching to the already active user keeps its session.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidUser`](crate::ValidationError) for
    /// a blank id or one containing `/`; the active session is kept. Propagates
    /// [`SyncError::SessionInactive`] if the new session was closed while
    /// reconciling.
    pub async fn switch_to(&mut self, user: impl Into<UserId>) -> Result<Arc<UserSession>> {
        let user = user.into();
        validate_user_id(&user)?;
        if let Some(active) = &self.active {
            if active.user() == user {
                return Ok(Arc::clone(active));
            }
        }
        self.close();

        let catalog = self.catalog_for(&user).await;
        let mut engine = SyncEngine::new(
            user.clone(),
            catalog,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.settings.zone,
        )
        .with_reconcile_timeout(self.settings.reconcile_timeout);
        if let Some(cache) = &self.cache {
            engine = engine.with_cache(Arc::clone(cache));
        }

        let session = Arc::new(UserSession::new(
            engine,
            self.settings.achievements.clone(),
            self.settings.streak,
        ));
        self.active = Some(Arc::clone(&session));
        info!(user = %user, "session started");

        session.start().await?;
        Ok(session)
    }

    /// Drop `user`'s cached today record and achievement ledger, closing
    /// their session first if it is the active one. Returns how many cache
    /// entries were removed.
    pub fn forget(&mut self, user: &str) -> Result<usize> {
        validate_user_id(user)?;
        if self.active_user() == Some(user) {
            self.close();
        }
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let removed = cache.clear_user(user)?;
        info!(user = %user, removed, "local state forgotten");
        Ok(removed)
    }

    /// Close the active session, if any.
    pub fn close(&mut self) {
        if let Some(previous) = self.active.take() {
            previous.close();
            info!(user = %previous.user(), "session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemKey;
    use crate::clock::ManualClock;
    use crate::day_record::DayRecord;
    use crate::events::Event;
    use crate::sync::memory::MemoryStore;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

    fn noon() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 6, 12, 0, 0).unwrap()
    }

    fn full_day(date: NaiveDate) -> DayRecord {
        let mut record = DayRecord::new(date);
        for task in ["reading", "exercise", "caring"] {
            record.put_level(ItemKey::flat(task), 1);
        }
        record
    }

    fn manager(store: Arc<MemoryStore>) -> SessionManager {
        SessionManager::new(
            store,
            TaskCatalog::builtin(),
            Arc::new(ManualClock::new(noon())),
            SessionSettings::default(),
        )
    }

    fn unlocked(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::AchievementUnlocked { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn token_is_shared_between_clones() {
        let token = SessionToken::new();
        let clone = token.clone();
        clone.deactivate();
        assert!(!token.is_active());
    }

    #[tokio::test]
    async fn switching_users_closes_the_previous_session() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = manager(store);

        let alice = manager.switch_to("alice").await.unwrap();
        assert!(alice.engine().is_reconciled());
        let same = manager.switch_to("alice").await.unwrap();
        assert!(Arc::ptr_eq(&alice, &same));

        let bob = manager.switch_to("bob").await.unwrap();
        assert_eq!(manager.active_user(), Some("bob"));
        assert!(!alice.engine().session().is_active());
        assert!(bob.engine().session().is_active());

        manager.close();
        assert!(manager.active().is_none());
        assert!(!bob.engine().session().is_active());
    }

    #[tokio::test]
    async fn invalid_user_id_keeps_the_active_session() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = manager(store);
        let alice = manager.switch_to("alice").await.unwrap();

        let err = manager.switch_to("alice/today").await.err().unwrap();
        assert!(matches!(
            err,
            crate::CoreError::Validation(crate::ValidationError::InvalidUser(_))
        ));
        assert_eq!(manager.active_user(), Some("alice"));
        assert!(alice.engine().session().is_active());
    }

    #[tokio::test]
    async fn forget_clears_only_that_user() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(LocalCache::open_memory().unwrap());
        let mut manager = manager(store).with_cache(cache.clone());

        for user in ["Alice", "alice"] {
            let session = manager.switch_to(user).await.unwrap();
            session.apply_level_change("reading", None, 1).await.unwrap();
        }
        assert!(manager.forget("alice").unwrap() >= 1);
        assert!(manager.active().is_none());
        assert!(cache.load_ledger("alice").unwrap().is_empty());
        assert!(cache.load_ledger("Alice").unwrap().contains("first_star"));

        // The stored level is still there, so the achievement is earned anew.
        let session = manager.switch_to("alice").await.unwrap();
        assert_eq!(session.engine().level("reading", None), 1);
        assert!(unlocked(&session.engine().drain_events()).contains(&"first_star".to_string()));
    }

    #[tokio::test]
    async fn users_do_not_share_state() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = manager(store.clone());

        let alice = manager.switch_to("alice").await.unwrap();
        alice.apply_level_change("reading", None, 3).await.unwrap();
        let bob = manager.switch_to("bob").await.unwrap();

        assert_eq!(bob.engine().level("reading", None), 0);
        let day = noon().date_naive();
        assert_eq!(store.level("alice", day, &ItemKey::flat("reading")), 3);
        assert_eq!(store.level("bob", day, &ItemKey::flat("reading")), 0);
    }

    #[tokio::test]
    async fn achievements_fire_once() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = manager(store);
        let session = manager.switch_to("alice").await.unwrap();
        session.engine().drain_events();

        session.apply_level_change("reading", None, 1).await.unwrap();
        assert_eq!(unlocked(&session.engine().drain_events()), vec!["first_star"]);

        for _ in 0..3 {
            assert_eq!(session.evaluate_achievements().await, 0);
        }
        session.apply_level_change("exercise", None, 2).await.unwrap();
        session.apply_level_change("caring", None, 1).await.unwrap();
        assert_eq!(
            unlocked(&session.engine().drain_events()),
            vec!["all_tasks_today"]
        );
        assert_eq!(session.ledger().len(), 2);
    }

    #[tokio::test]
    async fn ledger_survives_a_new_session() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(LocalCache::open_memory().unwrap());
        let mut manager = manager(store).with_cache(cache.clone());

        let session = manager.switch_to("alice").await.unwrap();
        session.apply_level_change("reading", None, 1).await.unwrap();
        manager.close();

        let session = manager.switch_to("alice").await.unwrap();
        assert!(session.ledger().contains("first_star"));
        assert!(!unlocked(&session.engine().drain_events()).contains(&"first_star".to_string()));
    }

    #[tokio::test]
    async fn streak_and_calendar_share_one_history_fetch() {
        let store = Arc::new(MemoryStore::new());
        let today = noon().date_naive();
        for back in 1..=7 {
            store.seed_day("alice", full_day(today - ChronoDuration::days(back)));
        }
        let mut manager = manager(store.clone());
        let session = manager.switch_to("alice").await.unwrap();

        let streak = session.streak().await;
        assert_eq!(streak.streak, 7);
        assert!(!streak.today_complete);
        assert!(session.ledger().contains("streak_7"));

        let week = session.rollup(RollupPeriod::Week).await;
        assert_eq!(week.full_days, 6);
        assert_eq!(week.empty_days, 1);

        // Later remote changes to past days are not seen until invalidated.
        store.seed_day("alice", DayRecord::new(today - ChronoDuration::days(1)));
        assert_eq!(session.streak().await.streak, 7);
        session.invalidate_history();
        assert_eq!(session.streak().await.streak, 0);
    }

    #[tokio::test]
    async fn month_breaks_down_into_clipped_weeks() {
        let store = Arc::new(MemoryStore::new());
        let today = noon().date_naive();
        for back in 1..=7 {
            store.seed_day("alice", full_day(today - ChronoDuration::days(back)));
        }
        let mut manager = manager(store);
        let session = manager.switch_to("alice").await.unwrap();

        // October 2025 starts on a Wednesday.
        let weeks = session.breakdown(RollupPeriod::Month).await;
        let labels: Vec<_> = weeks.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(
            labels,
            ["2025-W40", "2025-W41", "2025-W42", "2025-W43", "2025-W44"]
        );
        assert_eq!(weeks[0].days.len(), 5);
        assert_eq!(weeks[0].full_days, 5);
        assert_eq!(weeks.iter().map(|w| w.days.len()).sum::<usize>(), 31);

        assert_eq!(session.breakdown(RollupPeriod::Year).await.len(), 12);
        assert_eq!(session.breakdown(RollupPeriod::Day).await.len(), 1);
    }

    #[tokio::test]
    async fn finishing_today_counts_toward_the_streak_achievement() {
        let store = Arc::new(MemoryStore::new());
        let today = noon().date_naive();
        for back in 1..=6 {
            store.seed_day("alice", full_day(today - ChronoDuration::days(back)));
        }
        let mut manager = manager(store);
        let session = manager.switch_to("alice").await.unwrap();
        assert!(!session.ledger().contains("streak_7"));

        for task in ["reading", "exercise", "caring"] {
            session.apply_level_change(task, None, 1).await.unwrap();
        }
        assert!(session.ledger().contains("streak_7"));
        assert_eq!(session.calendar(RollupPeriod::Day).await.full_days, 1);
    }

    #[tokio::test]
    async fn catalog_source_is_consulted_per_user() {
        let store = Arc::new(MemoryStore::new());
        let custom = TaskCatalog::from_json(r#"{"tasks":[{"id":"stretch"}]}"#).unwrap();
        store.set_catalog("carol", custom);
        let mut manager = manager(store.clone()).with_catalog_source(store);

        let carol = manager.switch_to("carol").await.unwrap();
        assert_eq!(carol.engine().catalog().len(), 1);
        let dave = manager.switch_to("dave").await.unwrap();
        assert_eq!(dave.engine().catalog().len(), 3);
    }
}
