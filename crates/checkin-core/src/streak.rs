//! Consecutive-day streaks.
//!
//! The streak is never stored. It is recomputed by walking backward from
//! yesterday through history, so retroactive edits to past days can never
//! leave a stale counter behind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::TaskCatalog;
use crate::completion::CompletionRule;
use crate::day_record::DayRecord;
use crate::history::{DateRange, DayLookup};

/// Fixed bound on how far back the walk goes.
pub const DEFAULT_MAX_LOOKBACK_DAYS: u32 = 365;

/// Configuration for streak computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Maximum number of past days inspected
    pub max_lookback_days: u32,
    /// How tasks with activities are judged
    pub rule: CompletionRule,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            max_lookback_days: DEFAULT_MAX_LOOKBACK_DAYS,
            rule: CompletionRule::Any,
        }
    }
}

/// Streak figures for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSummary {
    pub as_of: NaiveDate,
    /// Complete days in a row ending yesterday. This is the stored notion of
    /// the streak.
    pub streak: u32,
    /// Whether today is already fully completed.
    pub today_complete: bool,
    /// `streak`, plus one when today is complete. Display only.
    pub current: u32,
    /// Longest run of complete days inside the lookback window.
    pub longest: u32,
}

/// Streak calculator
pub struct StreakCalculator<'a> {
    catalog: &'a TaskCatalog,
    config: StreakConfig,
}

impl<'a> StreakCalculator<'a> {
    /// Create a new calculator with default config
    pub fn new(catalog: &'a TaskCatalog) -> Self {
        Self {
            catalog,
            config: StreakConfig::default(),
        }
    }

    /// Create with custom config
    pub fn with_config(catalog: &'a TaskCatalog, config: StreakConfig) -> Self {
        Self { catalog, config }
    }

    fn counts(&self, record: Option<&DayRecord>) -> bool {
        record.is_some_and(|r| self.config.rule.is_day_complete(self.catalog, r))
    }

    /// Number of consecutive fully completed days ending the day before
    /// `today`. A missing day stops the walk exactly like an incomplete one.
    pub fn compute_streak(&self, history: &dyn DayLookup, today: NaiveDate) -> u32 {
        let mut streak = 0;
        let mut day = today;
        for _ in 0..self.config.max_lookback_days {
            let Some(previous) = day.pred_opt() else {
                break;
            };
            day = previous;
            if !self.counts(history.day(day)) {
                break;
            }
            streak += 1;
        }
        streak
    }

    /// [`compute_streak`](Self::compute_streak) plus one when `today` itself
    /// is fully completed.
    pub fn current_streak(&self, history: &dyn DayLookup, today: &DayRecord) -> u32 {
        let base = self.compute_streak(history, today.date());
        base + u32::from(self.counts(Some(today)))
    }

    /// Longest run of complete days inside `range`.
    pub fn longest_run(&self, history: &dyn DayLookup, range: DateRange) -> u32 {
        let mut longest = 0;
        let mut run = 0;
        for day in range.days() {
            if self.counts(history.day(day)) {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        longest
    }

    pub fn summary(&self, history: &dyn DayLookup, today: &DayRecord) -> StreakSummary {
        let streak = self.compute_streak(history, today.date());
        let today_complete = self.counts(Some(today));
        let window = DateRange::ending(today.date(), self.config.max_lookback_days.max(1) + 1);
        let live = crate::history::LiveView::new(history, today);

        StreakSummary {
            as_of: today.date(),
            streak,
            today_complete,
            current: streak + u32::from(today_complete),
            longest: self.longest_run(&live, window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemKey;
    use crate::history::HistoryWindow;
    use chrono::Duration;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()
    }

    fn full_day(date: NaiveDate) -> DayRecord {
        let mut record = DayRecord::new(date);
        for task in ["reading", "exercise", "caring"] {
            record.put_level(ItemKey::flat(task), 1);
        }
        record
    }

    fn partial_day(date: NaiveDate) -> DayRecord {
        let mut record = DayRecord::new(date);
        record.put_level(ItemKey::flat("reading"), 3);
        record
    }

    fn window(records: Vec<DayRecord>) -> HistoryWindow {
        HistoryWindow::from_records(today(), records)
    }

    #[test]
    fn no_history_means_zero() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        assert_eq!(calc.compute_streak(&window(vec![]), today()), 0);
    }

    #[test]
    fn counts_back_from_yesterday() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        let history = window(vec![
            full_day(today() - Duration::days(1)),
            full_day(today() - Duration::days(2)),
            full_day(today() - Duration::days(3)),
            partial_day(today() - Duration::days(4)),
            full_day(today() - Duration::days(5)),
        ]);
        assert_eq!(calc.compute_streak(&history, today()), 3);
    }

    #[test]
    fn single_missing_day_breaks_streak() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        let history = window(vec![
            full_day(today() - Duration::days(1)),
            full_day(today() - Duration::days(3)),
        ]);
        assert_eq!(calc.compute_streak(&history, today()), 1);
    }

    #[test]
    fn today_is_only_a_display_bonus() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        let history = window(vec![full_day(today() - Duration::days(1))]);

        let done_today = full_day(today());
        assert_eq!(calc.compute_streak(&history, today()), 1);
        assert_eq!(calc.current_streak(&history, &done_today), 2);
        assert_eq!(calc.current_streak(&history, &partial_day(today())), 1);

        let summary = calc.summary(&history, &done_today);
        assert_eq!(summary.streak, 1);
        assert_eq!(summary.current, 2);
        assert!(summary.today_complete);
        assert_eq!(summary.longest, 2);
    }

    #[test]
    fn lookback_is_bounded() {
        let catalog = TaskCatalog::builtin();
        let config = StreakConfig {
            max_lookback_days: 5,
            ..StreakConfig::default()
        };
        let calc = StreakCalculator::with_config(&catalog, config);
        let records = (1..=10).map(|d| full_day(today() - Duration::days(d))).collect();
        assert_eq!(calc.compute_streak(&window(records), today()), 5);
    }

    #[test]
    fn reference_scenario_three_days() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        let day1 = today() - Duration::days(3);
        let day2 = day1 + Duration::days(1);
        let day3 = day2 + Duration::days(1);
        let day4 = day3 + Duration::days(1);

        let mut history = HistoryWindow::empty(day4);
        history.insert(full_day(day1));
        assert_eq!(calc.compute_streak(&history, day2), 1);

        history.insert(full_day(day2));
        assert_eq!(calc.compute_streak(&history, day3), 2);

        history.insert(partial_day(day3));
        assert_eq!(calc.compute_streak(&history, day4), 0);
    }

    #[test]
    fn longest_run_spans_gaps() {
        let catalog = TaskCatalog::builtin();
        let calc = StreakCalculator::new(&catalog);
        let history = window(vec![
            full_day(today() - Duration::days(9)),
            full_day(today() - Duration::days(8)),
            full_day(today() - Duration::days(7)),
            full_day(today() - Duration::days(2)),
        ]);
        assert_eq!(calc.longest_run(&history, DateRange::ending(today(), 30)), 3);
    }

    proptest! {
        #[test]
        fn streak_equals_leading_complete_run(k in 0u32..40, tail in 0u32..10) {
            let catalog = TaskCatalog::builtin();
            let calc = StreakCalculator::new(&catalog);
            let mut records: Vec<DayRecord> = (1..=k)
                .map(|d| full_day(today() - Duration::days(i64::from(d))))
                .collect();
            records.push(partial_day(today() - Duration::days(i64::from(k) + 1)));
            records.extend(
                (0..tail).map(|d| full_day(today() - Duration::days(i64::from(k + 2 + d)))),
            );
            prop_assert_eq!(calc.compute_streak(&window(records), today()), k);
        }
    }
}
