//! Per-day completion state for one user.
//!
//! A [`DayRecord`] maps `(task, activity?)` to a level in `0..=3`. The set of
//! completed items (level > 0) is a cache derived from the levels and is
//! rebuilt after every change; it is never edited on its own.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ActivityId, ItemKey, Level, TaskCatalog, TaskId, MAX_LEVEL};
use crate::error::ValidationError;

/// Per-task level in the wire format: a bare level for flat tasks, or an
/// `{activity: level}` object for tasks with activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskStatus {
    Flat(Level),
    Activities(BTreeMap<ActivityId, Level>),
}

/// `{task: level | {activity: level}}` as exchanged with collaborators.
pub type StatusMap = BTreeMap<TaskId, TaskStatus>;

/// Parse one wire level. Booleans are accepted as 0/1 (older records stored
/// a `done` flag); anything else outside `0..=3` is malformed.
fn parse_level(value: &serde_json::Value) -> Option<Level> {
    match value {
        serde_json::Value::Bool(done) => Some(Level::from(*done)),
        serde_json::Value::Number(n) => n
            .as_u64()
            .filter(|l| *l <= u64::from(MAX_LEVEL))
            .map(|l| l as Level),
        _ => None,
    }
}

/// Leniently parse a status object. Malformed entries are dropped, so a
/// damaged day reads as (partially) empty rather than as an error.
pub fn parse_status_map(value: &serde_json::Value) -> StatusMap {
    let mut out = StatusMap::new();
    let Some(object) = value.as_object() else {
        debug!("status payload is not an object, treating as empty");
        return out;
    };

    for (task, raw) in object {
        if let Some(level) = parse_level(raw) {
            out.insert(task.clone(), TaskStatus::Flat(level));
        } else if let Some(activities) = raw.as_object() {
            let parsed: BTreeMap<ActivityId, Level> = activities
                .iter()
                .filter_map(|(activity, v)| parse_level(v).map(|l| (activity.clone(), l)))
                .collect();
            out.insert(task.clone(), TaskStatus::Activities(parsed));
        } else {
            debug!(task = %task, "dropping malformed status entry");
        }
    }
    out
}

/// Completion state of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DayRecordData", into = "DayRecordData")]
pub struct DayRecord {
    date: NaiveDate,
    levels: BTreeMap<ItemKey, Level>,
    completed: BTreeSet<ItemKey>,
    notes: BTreeMap<TaskId, String>,
}

#[derive(Serialize, Deserialize)]
struct DayRecordData {
    date: NaiveDate,
    #[serde(default)]
    tasks: StatusMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    notes: BTreeMap<TaskId, String>,
}

impl From<DayRecordData> for DayRecord {
    fn from(data: DayRecordData) -> Self {
        let mut record = DayRecord::from_status(data.date, &data.tasks);
        record.notes = data.notes;
        record
    }
}

impl From<DayRecord> for DayRecordData {
    fn from(record: DayRecord) -> Self {
        DayRecordData {
            date: record.date,
            tasks: record.to_status(),
            notes: record.notes,
        }
    }
}

impl DayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            levels: BTreeMap::new(),
            completed: BTreeSet::new(),
            notes: BTreeMap::new(),
        }
    }

    /// Build a record from a wire status map without consulting a catalog.
    /// Used for history, where the catalog may have changed since.
    pub fn from_status(date: NaiveDate, status: &StatusMap) -> Self {
        let mut record = Self::new(date);
        for (task, entry) in status {
            match entry {
                TaskStatus::Flat(level) => {
                    record.write(ItemKey::flat(task.clone()), *level);
                }
                TaskStatus::Activities(activities) => {
                    for (activity, level) in activities {
                        record.write(ItemKey::new(task.clone(), Some(activity)), *level);
                    }
                }
            }
        }
        record.recompute_completed();
        record
    }

    /// Group the levels back into the wire shape.
    pub fn to_status(&self) -> StatusMap {
        let mut out = StatusMap::new();
        for (key, level) in &self.levels {
            match &key.activity {
                None => {
                    out.insert(key.task.clone(), TaskStatus::Flat(*level));
                }
                Some(activity) => {
                    let entry = out
                        .entry(key.task.clone())
                        .or_insert_with(|| TaskStatus::Activities(BTreeMap::new()));
                    if let TaskStatus::Activities(map) = entry {
                        map.insert(activity.clone(), *level);
                    }
                }
            }
        }
        out
    }

    /// Like [`to_status`](Self::to_status) but with an explicit 0 for every
    /// catalog item that is unset.
    pub fn status_for(&self, catalog: &TaskCatalog) -> StatusMap {
        let mut out = StatusMap::new();
        for item in catalog.items() {
            let level = self.level_of(&item);
            match item.activity {
                None => {
                    out.insert(item.task, TaskStatus::Flat(level));
                }
                Some(activity) => {
                    let entry = out
                        .entry(item.task)
                        .or_insert_with(|| TaskStatus::Activities(BTreeMap::new()));
                    if let TaskStatus::Activities(map) = entry {
                        map.insert(activity, level);
                    }
                }
            }
        }
        out
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Level of an item; 0 when unset.
    pub fn level(&self, task: &str, activity: Option<&str>) -> Level {
        self.level_of(&ItemKey::new(task, activity))
    }

    pub fn level_of(&self, key: &ItemKey) -> Level {
        self.levels.get(key).copied().unwrap_or(0)
    }

    pub fn levels(&self) -> impl Iterator<Item = (&ItemKey, Level)> {
        self.levels.iter().map(|(k, l)| (k, *l))
    }

    /// Items with level > 0.
    pub fn completed(&self) -> &BTreeSet<ItemKey> {
        &self.completed
    }

    /// A flat task counts when its level is > 0; a task with activities
    /// counts as soon as any one activity has a level > 0.
    pub fn is_task_completed(&self, task: &str) -> bool {
        self.completed.iter().any(|k| k.task == task)
    }

    pub fn task_stars(&self, task: &str) -> u32 {
        self.levels
            .iter()
            .filter(|(k, _)| k.task == task)
            .map(|(_, l)| u32::from(*l))
            .sum()
    }

    /// Sum of every level recorded for the day.
    pub fn total_stars(&self) -> u32 {
        self.levels.values().map(|l| u32::from(*l)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn note(&self, task: &str) -> Option<&str> {
        self.notes.get(task).map(String::as_str)
    }

    pub fn notes(&self) -> &BTreeMap<TaskId, String> {
        &self.notes
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Set the level of an item after validating it against the catalog.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] and leaves the record untouched when the
    /// item is unknown or `level` exceeds its declared range.
    pub fn set_level(
        &mut self,
        catalog: &TaskCatalog,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<(), ValidationError> {
        let key = ItemKey::new(task, activity);
        catalog.validate_level(&key, level)?;
        self.put_level(key, level);
        Ok(())
    }

    /// Toggle rule: selecting the active level clears the item, selecting any
    /// other level sets it directly. Returns the new level.
    pub fn toggle(
        &mut self,
        catalog: &TaskCatalog,
        task: &str,
        activity: Option<&str>,
        level: Level,
    ) -> Result<Level, ValidationError> {
        let key = ItemKey::new(task, activity);
        catalog.validate_level(&key, level)?;
        let next = toggled(self.level_of(&key), level);
        self.put_level(key, next);
        Ok(next)
    }

    /// Unchecked write used by rollback and reconciliation.
    pub(crate) fn put_level(&mut self, key: ItemKey, level: Level) {
        self.write(key, level);
        self.recompute_completed();
    }

    /// Overwrite every field present in `remote`; leave absent fields alone.
    /// Fields the catalog does not know are skipped and remote levels above
    /// an item's declared maximum are capped. Returns how many local values
    /// changed.
    pub fn merge_remote(&mut self, catalog: &TaskCatalog, remote: &StatusMap) -> usize {
        let mut changed = 0;
        for (task, entry) in remote {
            let incoming: Vec<(ItemKey, Level)> = match entry {
                TaskStatus::Flat(level) => vec![(ItemKey::flat(task.clone()), *level)],
                TaskStatus::Activities(map) => map
                    .iter()
                    .map(|(a, l)| (ItemKey::new(task.clone(), Some(a)), *l))
                    .collect(),
            };

            for (key, level) in incoming {
                let Ok(max) = catalog.max_level(&key) else {
                    debug!(item = %key, "remote field not in catalog, skipped");
                    continue;
                };
                let level = level.min(max);
                if self.level_of(&key) != level {
                    self.write(key, level);
                    changed += 1;
                }
            }
        }
        self.recompute_completed();
        changed
    }

    pub(crate) fn set_note(&mut self, task: &str, note: Option<String>) {
        match note.filter(|n| !n.trim().is_empty()) {
            Some(note) => {
                self.notes.insert(task.to_string(), note);
            }
            None => {
                self.notes.remove(task);
            }
        }
    }

    fn write(&mut self, key: ItemKey, level: Level) {
        if level == 0 {
            self.levels.remove(&key);
        } else {
            self.levels.insert(key, level.min(MAX_LEVEL));
        }
    }

    fn recompute_completed(&mut self) {
        self.completed = self
            .levels
            .iter()
            .filter(|(_, l)| **l > 0)
            .map(|(k, _)| k.clone())
            .collect();
    }
}

/// New level after the user selects `selected` while `current` is active.
pub fn toggled(current: Level, selected: Level) -> Level {
    if current == selected {
        0
    } else {
        selected
    }
}
