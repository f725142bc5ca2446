//! Threshold achievements that fire at most once per user.
//!
//! Achievements are a data table of `(id, predicate)` rows. Each evaluation
//! checks the ledger first, so running [`AchievementEngine::evaluate`] any
//! number of times in the same state fires every row at most once.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::Event;

/// Predicate family of an achievement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    /// At least one star today
    FirstStar,
    /// Every catalog task completed today
    AllTasksToday,
    /// Current streak (including a completed today) reaches `threshold`
    StreakAtLeast,
}

/// One configured achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementRule {
    pub id: String,
    pub title: String,
    pub kind: AchievementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
}

impl AchievementRule {
    pub fn new(id: &str, title: &str, kind: AchievementKind) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            kind,
            threshold: None,
        }
    }

    pub fn streak(id: &str, title: &str, days: u32) -> Self {
        Self {
            threshold: Some(days),
            ..Self::new(id, title, AchievementKind::StreakAtLeast)
        }
    }

    pub fn holds(&self, snapshot: &AchievementSnapshot) -> bool {
        match self.kind {
            AchievementKind::FirstStar => snapshot.stars_today > 0,
            AchievementKind::AllTasksToday => snapshot.all_tasks_today,
            AchievementKind::StreakAtLeast => match self.threshold {
                Some(n) => snapshot.streak >= n,
                None => {
                    debug!(id = %self.id, "streak achievement without threshold never fires");
                    false
                }
            },
        }
    }
}

/// Default achievement table.
pub fn default_rules() -> Vec<AchievementRule> {
    vec![
        AchievementRule::new("first_star", "First star", AchievementKind::FirstStar),
        AchievementRule::new(
            "all_tasks_today",
            "Every task done in one day",
            AchievementKind::AllTasksToday,
        ),
        AchievementRule::streak("streak_7", "One week streak", 7),
        AchievementRule::streak("streak_30", "One month streak", 30),
    ]
}

/// Append-only set of achievement ids already fired for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AchievementLedger {
    fired: BTreeSet<String>,
}

impl AchievementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fired.contains(id)
    }

    /// Record `id`. Returns `false` when it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.fired.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fired.iter().map(String::as_str)
    }
}

/// State the predicates are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementSnapshot {
    pub stars_today: u32,
    pub all_tasks_today: bool,
    /// Streak including today when today is complete.
    pub streak: u32,
}

/// Evaluates the achievement table against a snapshot.
#[derive(Debug, Clone)]
pub struct AchievementEngine {
    rules: Vec<AchievementRule>,
}

impl AchievementEngine {
    pub fn new(rules: Vec<AchievementRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AchievementRule] {
        &self.rules
    }

    /// Fire every row whose predicate holds and whose id is not yet in
    /// `ledger`. Never fails; returns the notifications to deliver.
    pub fn evaluate(
        &self,
        user: &str,
        ledger: &mut AchievementLedger,
        snapshot: &AchievementSnapshot,
        at: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut fired = Vec::new();
        for rule in &self.rules {
            if ledger.contains(&rule.id) || !rule.holds(snapshot) {
                continue;
            }
            if ledger.insert(&rule.id) {
                info!(user = %user, id = %rule.id, "achievement unlocked");
                fired.push(Event::AchievementUnlocked {
                    user: user.to_string(),
                    id: rule.id.clone(),
                    title: rule.title.clone(),
                    at,
                });
            }
        }
        fired
    }
}

impl Default for AchievementEngine {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::AchievementUnlocked { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_fires_on_empty_state() {
        let engine = AchievementEngine::default();
        let mut ledger = AchievementLedger::new();
        let fired = engine.evaluate("u", &mut ledger, &AchievementSnapshot::default(), Utc::now());
        assert!(fired.is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn fires_each_at_most_once() {
        let engine = AchievementEngine::default();
        let mut ledger = AchievementLedger::new();
        let snapshot = AchievementSnapshot {
            stars_today: 6,
            all_tasks_today: true,
            streak: 7,
        };

        let first = engine.evaluate("u", &mut ledger, &snapshot, Utc::now());
        assert_eq!(ids(&first), vec!["first_star", "all_tasks_today", "streak_7"]);

        for _ in 0..5 {
            assert!(engine.evaluate("u", &mut ledger, &snapshot, Utc::now()).is_empty());
        }
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn later_thresholds_fire_when_reached() {
        let engine = AchievementEngine::default();
        let mut ledger = AchievementLedger::new();
        let mut snapshot = AchievementSnapshot {
            stars_today: 1,
            all_tasks_today: false,
            streak: 29,
        };
        engine.evaluate("u", &mut ledger, &snapshot, Utc::now());
        assert!(!ledger.contains("streak_30"));

        snapshot.streak = 30;
        let fired = engine.evaluate("u", &mut ledger, &snapshot, Utc::now());
        assert_eq!(ids(&fired), vec!["streak_30"]);
    }

    #[test]
    fn ledger_survives_state_regressing() {
        let engine = AchievementEngine::default();
        let mut ledger = AchievementLedger::new();
        let starred = AchievementSnapshot {
            stars_today: 1,
            ..Default::default()
        };
        engine.evaluate("u", &mut ledger, &starred, Utc::now());
        engine.evaluate("u", &mut ledger, &AchievementSnapshot::default(), Utc::now());
        assert!(engine.evaluate("u", &mut ledger, &starred, Utc::now()).is_empty());
    }

    #[test]
    fn custom_table_from_toml() {
        #[derive(Deserialize)]
        struct Table {
            achievements: Vec<AchievementRule>,
        }
        let table: Table = toml::from_str(
            r#"
            [[achievements]]
            id = "streak_3"
            title = "Three in a row"
            kind = "streak_at_least"
            threshold = 3

            [[achievements]]
            id = "no_threshold"
            title = "Broken row"
            kind = "streak_at_least"
            "#,
        )
        .unwrap();

        let engine = AchievementEngine::new(table.achievements);
        let mut ledger = AchievementLedger::new();
        let snapshot = AchievementSnapshot {
            streak: 100,
            ..Default::default()
        };
        let fired = engine.evaluate("u", &mut ledger, &snapshot, Utc::now());
        assert_eq!(ids(&fired), vec!["streak_3"]);
    }

    #[test]
    fn ledger_serializes_as_list() {
        let mut ledger = AchievementLedger::new();
        ledger.insert("streak_7");
        ledger.insert("first_star");
        let json = serde_json::to_string(&ledger).unwrap();
        assert_eq!(json, r#"["first_star","streak_7"]"#);
    }
}
