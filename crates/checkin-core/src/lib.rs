//! # Daily Check-in Core Library
//!
//! This library provides the core logic for a daily habit check-in tracker.
//! Users record a 0-3 star level per task (or per task activity) each day;
//! the library keeps that state in sync with an authoritative store and
//! derives streaks, calendar rollups and achievements from it. The `checkin`
//! CLI is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Day records**: per-user, per-day levels and notes with the toggle rule
//! - **Sync engine**: optimistic local writes, rollback on failure,
//!   last-intent-wins per item and a reconcile gate
//! - **Derived views**: streak walk, calendar aggregation and achievements,
//!   all sharing one completion predicate
//! - **Storage**: SQLite completion store, warm-start cache and TOML
//!   configuration
//!
//! ## Key Components
//!
//! - [`SessionManager`]: owns the active user's [`UserSession`]
//! - [`SyncEngine`]: optimistic writes against a [`CompletionStore`]
//! - [`StreakCalculator`] and [`AggregationEngine`]: derived views
//! - [`Config`]: application configuration management

pub mod achievements;
pub mod aggregate;
pub mod catalog;
pub mod clock;
pub mod completion;
pub mod day_record;
pub mod error;
pub mod events;
pub mod history;
pub mod session;
pub mod storage;
pub mod streak;
pub mod sync;

pub use achievements::{AchievementEngine, AchievementLedger, AchievementRule};
pub use aggregate::{AggregationEngine, DayClass, DaySummary, PeriodSummary, RollupPeriod};
pub use catalog::{validate_user_id, ItemKey, Level, TaskCatalog, TaskSpec, UserId};
pub use clock::{Clock, ManualClock, ReferenceZone, SystemClock};
pub use completion::CompletionRule;
pub use day_record::{DayRecord, StatusMap, TaskStatus};
pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use events::Event;
pub use history::{DateRange, DayLookup, HistoryWindow};
pub use session::{SessionManager, SessionSettings, SessionToken, UserSession};
pub use storage::{CompletionDb, Config, LocalCache};
pub use streak::{StreakCalculator, StreakConfig, StreakSummary};
pub use sync::{
    CatalogSource, CompletionStore, HttpRemote, MemoryStore, SyncEngine, SyncError, SyncStatus,
    WriteOutcome,
};
