//! The one predicate deciding whether a day counts as fully completed.
//!
//! The streak walk and the calendar classification both call
//! [`CompletionRule::is_day_complete`], so a day colored "full" is always a
//! day that counts toward a streak.

use serde::{Deserialize, Serialize};

use crate::catalog::{TaskCatalog, TaskSpec};
use crate::day_record::DayRecord;

/// How a task with activities is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionRule {
    /// Any activity with a level > 0 completes the task.
    #[default]
    Any,
    /// Every catalog activity needs a level > 0.
    All,
}

impl CompletionRule {
    pub fn is_task_completed(&self, task: &TaskSpec, record: &DayRecord) -> bool {
        match self {
            CompletionRule::Any => record.is_task_completed(&task.id),
            CompletionRule::All if task.is_flat() => record.level(&task.id, None) > 0,
            CompletionRule::All => {
                // A task-level entry (older history) covers all of its activities.
                record.level(&task.id, None) > 0
                    || task
                        .activities
                        .iter()
                        .all(|a| record.level(&task.id, Some(&a.id)) > 0)
            }
        }
    }

    /// Every catalog task completed on `record`'s day. An empty catalog never
    /// completes a day.
    pub fn is_day_complete(&self, catalog: &TaskCatalog, record: &DayRecord) -> bool {
        !catalog.is_empty()
            && catalog
                .tasks()
                .iter()
                .all(|task| self.is_task_completed(task, record))
    }

    /// Number of catalog tasks completed on `record`'s day.
    pub fn completed_tasks(&self, catalog: &TaskCatalog, record: &DayRecord) -> usize {
        catalog
            .tasks()
            .iter()
            .filter(|task| self.is_task_completed(task, record))
            .count()
    }
}
