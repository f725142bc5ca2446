//! Events the sync engine and sessions queue for the caller to drain.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{ActivityId, Level, TaskId, UserId};

/// Every observable state change produces an Event.
/// The presentation layer drains them after each call; nothing is pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A level was applied locally (optimistic) for today.
    LevelChanged {
        user: UserId,
        task: TaskId,
        activity: Option<ActivityId>,
        from: Level,
        to: Level,
        at: DateTime<Utc>,
    },
    /// A remote write failed and the local level was put back.
    LevelReverted {
        user: UserId,
        task: TaskId,
        activity: Option<ActivityId>,
        attempted: Level,
        restored: Level,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Remote state for today was pulled into the local record.
    Reconciled {
        user: UserId,
        date: NaiveDate,
        updated: usize,
        /// The remote could not be reached; local cache is in use.
        degraded: bool,
        at: DateTime<Utc>,
    },
    /// The reference date advanced; yesterday's record became history.
    DayRolledOver {
        user: UserId,
        from: NaiveDate,
        to: NaiveDate,
        at: DateTime<Utc>,
    },
    NoteChanged {
        user: UserId,
        task: TaskId,
        note: Option<String>,
        at: DateTime<Utc>,
    },
    /// One-shot notification; fires at most once per user and id.
    AchievementUnlocked {
        user: UserId,
        id: String,
        title: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::LevelChanged { at, .. }
            | Event::LevelReverted { at, .. }
            | Event::Reconciled { at, .. }
            | Event::DayRolledOver { at, .. }
            | Event::NoteChanged { at, .. }
            | Event::AchievementUnlocked { at, .. } => *at,
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Event::LevelChanged { user, .. }
            | Event::LevelReverted { user, .. }
            | Event::Reconciled { user, .. }
            | Event::DayRolledOver { user, .. }
            | Event::NoteChanged { user, .. }
            | Event::AchievementUnlocked { user, .. } => user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::AchievementUnlocked {
            user: "alice".into(),
            id: "first_star".into(),
            title: "First star".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AchievementUnlocked");
        assert_eq!(json["id"], "first_star");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.user(), "alice");
    }
}
