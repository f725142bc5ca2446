//! Task catalog: which tasks and activities exist and how many levels each has.
//!
//! The catalog is supplied by a configuration collaborator (a JSON file or the
//! remote `catalog` endpoint) and is read-only for the lifetime of a session.
//! A task without activities is a *flat* task whose levels apply directly.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ValidationError};

/// Highest level any item can reach.
pub const MAX_LEVEL: u8 = 3;

pub type UserId = String;

/// User ids become path segments in cache keys and request URLs, so they
/// must be non-blank and free of `/`.
pub fn validate_user_id(user: &str) -> Result<(), ValidationError> {
    if user.trim().is_empty() || user.contains('/') {
        return Err(ValidationError::InvalidUser(user.to_string()));
    }
    Ok(())
}

pub type TaskId = String;
pub type ActivityId = String;
pub type Level = u8;

/// Address of one level-carrying item: a flat task or one activity of a task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub task: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityId>,
}

impl ItemKey {
    pub fn new(task: impl Into<TaskId>, activity: Option<&str>) -> Self {
        Self {
            task: task.into(),
            activity: activity.map(str::to_string),
        }
    }

    pub fn flat(task: impl Into<TaskId>) -> Self {
        Self {
            task: task.into(),
            activity: None,
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.activity {
            Some(activity) => write!(f, "{}/{}", self.task, activity),
            None => f.write_str(&self.task),
        }
    }
}

/// One activity of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    pub id: ActivityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub level_labels: BTreeMap<Level, String>,
}

/// One configured task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Labels for a flat task's levels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub level_labels: BTreeMap<Level, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<ActivitySpec>,
}

impl TaskSpec {
    pub fn is_flat(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn activity(&self, id: &str) -> Option<&ActivitySpec> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

/// Immutable, ordered description of the tasks a user tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCatalog {
    tasks: Vec<TaskSpec>,
}

/// Highest declared level, or [`MAX_LEVEL`] when no labels are declared.
fn max_declared(labels: &BTreeMap<Level, String>) -> Level {
    labels.keys().next_back().copied().unwrap_or(MAX_LEVEL)
}

impl TaskCatalog {
    /// Build and validate a catalog.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when the catalog is empty, ids
    /// repeat, or a level label lies outside `1..=3`.
    pub fn new(tasks: Vec<TaskSpec>) -> Result<Self, ConfigError> {
        let catalog = Self { tasks };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Built-in catalog used when the configured one is missing or malformed.
    pub fn builtin() -> Self {
        fn labels(items: [&str; 3]) -> BTreeMap<Level, String> {
            items
                .iter()
                .enumerate()
                .map(|(i, s)| (i as Level + 1, s.to_string()))
                .collect()
        }

        Self {
            tasks: vec![
                TaskSpec {
                    id: "reading".into(),
                    title: Some("Reading".into()),
                    icon: Some("📚".into()),
                    description: Some("Feed your mind with knowledge!".into()),
                    level_labels: labels(["1 page read", "5 minutes reading", "15 minutes reading"]),
                    activities: Vec::new(),
                },
                TaskSpec {
                    id: "exercise".into(),
                    title: Some("Exercise".into()),
                    icon: Some("💪".into()),
                    description: Some("Strengthen your body and mind!".into()),
                    level_labels: labels([
                        "10 minutes movement",
                        "20 minutes workout",
                        "45 minutes exercise",
                    ]),
                    activities: Vec::new(),
                },
                TaskSpec {
                    id: "caring".into(),
                    title: Some("Self-Care".into()),
                    icon: Some("❤️".into()),
                    description: Some("Nurture your wellbeing!".into()),
                    level_labels: labels([
                        "5 minutes meditation",
                        "15 minutes self-care",
                        "30 minutes wellness",
                    ]),
                    activities: Vec::new(),
                },
            ],
        }
    }

    /// Parse the `{tasks: [...]}` document served by the config collaborator.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let parsed: TaskCatalog =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load a catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Load a catalog file, falling back to [`TaskCatalog::builtin`].
    ///
    /// Never fails: a missing or malformed file is logged and replaced.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::load(path).unwrap_or_else(|e| {
                warn!(error = %e, "catalog unusable, using built-in default");
                Self::builtin()
            }),
            None => Self::builtin(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "tasks".into(),
                message: "catalog must declare at least one task".into(),
            });
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "tasks.id".into(),
                    message: "task id must not be empty".into(),
                });
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "tasks.id".into(),
                    message: format!("duplicate task id '{}'", task.id),
                });
            }
            check_labels(&task.id, &task.level_labels)?;

            let mut activity_ids = HashSet::new();
            for activity in &task.activities {
                if !activity_ids.insert(activity.id.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{}.activities", task.id),
                        message: format!("duplicate activity id '{}'", activity.id),
                    });
                }
                check_labels(&format!("{}/{}", task.id, activity.id), &activity.level_labels)?;
            }
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every level-carrying item in catalog order.
    pub fn items(&self) -> Vec<ItemKey> {
        let mut items = Vec::new();
        for task in &self.tasks {
            if task.is_flat() {
                items.push(ItemKey::flat(task.id.clone()));
            } else {
                for activity in &task.activities {
                    items.push(ItemKey::new(task.id.clone(), Some(&activity.id)));
                }
            }
        }
        items
    }

    /// Resolve the highest level `item` accepts.
    ///
    /// # Errors
    /// Fails when the task or activity is unknown, or when a task with
    /// activities is addressed without one (and vice versa).
    pub fn max_level(&self, item: &ItemKey) -> Result<Level, ValidationError> {
        let task = self
            .task(&item.task)
            .ok_or_else(|| ValidationError::UnknownTask(item.task.clone()))?;

        match (&item.activity, task.is_flat()) {
            (None, true) => Ok(max_declared(&task.level_labels)),
            (None, false) => Err(ValidationError::ActivityRequired(task.id.clone())),
            (Some(activity), _) => task
                .activity(activity)
                .map(|a| max_declared(&a.level_labels))
                .ok_or_else(|| ValidationError::UnknownActivity {
                    task: task.id.clone(),
                    activity: activity.clone(),
                }),
        }
    }

    /// Check that `level` is acceptable for `item`.
    pub fn validate_level(&self, item: &ItemKey, level: Level) -> Result<(), ValidationError> {
        let max = self.max_level(item)?;
        if level > max {
            return Err(ValidationError::LevelOutOfRange {
                item: item.to_string(),
                level,
                max,
            });
        }
        Ok(())
    }

    /// Human label for `level` of `item`, if declared.
    pub fn level_label(&self, item: &ItemKey, level: Level) -> Option<&str> {
        let task = self.task(&item.task)?;
        let labels = match &item.activity {
            Some(activity) => &task.activity(activity)?.level_labels,
            None => &task.level_labels,
        };
        labels.get(&level).map(String::as_str)
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn check_labels(owner: &str, labels: &BTreeMap<Level, String>) -> Result<(), ConfigError> {
    match labels.keys().find(|l| **l == 0 || **l > MAX_LEVEL) {
        Some(bad) => Err(ConfigError::InvalidValue {
            key: format!("{owner}.levelLabels"),
            message: format!("level {bad} outside 1..={MAX_LEVEL}"),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: &str = r#"{
        "tasks": [
            {"id": "meaning", "activities": [
                {"id": "programming", "levelLabels": {"1": "10 min", "2": "30 min", "3": "1 hour"}},
                {"id": "writing", "levelLabels": {"1": "a line", "2": "a page"}}
            ]},
            {"id": "fitness", "activities": [{"id": "workout", "levelLabels": {}}]},
            {"id": "duty"}
        ]
    }"#;

    #[test]
    fn builtin_matches_reference_tasks() {
        let catalog = TaskCatalog::builtin();
        let ids: Vec<_> = catalog.task_ids().collect();
        assert_eq!(ids, vec!["reading", "exercise", "caring"]);
        assert_eq!(
            catalog.level_label(&ItemKey::flat("reading"), 2),
            Some("5 minutes reading")
        );
    }

    #[test]
    fn user_ids_are_single_path_segments() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("a_b%").is_ok());
        assert_eq!(
            validate_user_id("a/b"),
            Err(ValidationError::InvalidUser("a/b".into()))
        );
        assert!(validate_user_id("  ").is_err());
    }

    #[test]
    fn parses_activity_catalog() {
        let catalog = TaskCatalog::from_json(MULTI).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.items().len(), 4);

        let writing = ItemKey::new("meaning", Some("writing"));
        assert_eq!(catalog.max_level(&writing).unwrap(), 2);
        let workout = ItemKey::new("fitness", Some("workout"));
        assert_eq!(catalog.max_level(&workout).unwrap(), MAX_LEVEL);
        assert_eq!(catalog.max_level(&ItemKey::flat("duty")).unwrap(), MAX_LEVEL);
    }

    #[test]
    fn max_level_rejects_bad_addresses() {
        let catalog = TaskCatalog::from_json(MULTI).unwrap();
        assert_eq!(
            catalog.max_level(&ItemKey::flat("meaning")),
            Err(ValidationError::ActivityRequired("meaning".into()))
        );
        assert!(matches!(
            catalog.max_level(&ItemKey::new("meaning", Some("nope"))),
            Err(ValidationError::UnknownActivity { .. })
        ));
        assert!(matches!(
            catalog.max_level(&ItemKey::flat("ghost")),
            Err(ValidationError::UnknownTask(_))
        ));
    }

    #[test]
    fn validate_level_checks_declared_range() {
        let catalog = TaskCatalog::from_json(MULTI).unwrap();
        let writing = ItemKey::new("meaning", Some("writing"));
        assert!(catalog.validate_level(&writing, 2).is_ok());
        assert!(catalog.validate_level(&writing, 0).is_ok());
        assert!(matches!(
            catalog.validate_level(&writing, 3),
            Err(ValidationError::LevelOutOfRange { max: 2, .. })
        ));
    }

    #[test]
    fn rejects_malformed_catalogs() {
        assert!(TaskCatalog::from_json(r#"{"tasks": []}"#).is_err());
        assert!(TaskCatalog::from_json(r#"{"tasks": [{"id": "a"}, {"id": "a"}]}"#).is_err());
        assert!(TaskCatalog::from_json(
            r#"{"tasks": [{"id": "a", "levelLabels": {"4": "too much"}}]}"#
        )
        .is_err());
        assert!(TaskCatalog::from_json("not json").is_err());
    }

    #[test]
    fn load_or_default_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ broken").unwrap();
        assert_eq!(TaskCatalog::load_or_default(Some(&path)), TaskCatalog::builtin());

        std::fs::write(&path, MULTI).unwrap();
        assert_eq!(TaskCatalog::load_or_default(Some(&path)).len(), 3);
    }
}
