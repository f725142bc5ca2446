//! Calendar rollups over day records.
//!
//! Each day is classified as [`DayClass::Full`], [`DayClass::Partial`] or
//! [`DayClass::Empty`] with the same predicate the streak walk uses. Today is
//! taken from the live record when one is given; past days always come from
//! history. Aggregation never fails: a missing or damaged day is empty.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::catalog::TaskCatalog;
use crate::completion::CompletionRule;
use crate::day_record::DayRecord;
use crate::history::{DateRange, DayLookup, LiveView};

/// Calendar classification of one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayClass {
    /// Every catalog task completed
    Full,
    /// Some stars, but not every task
    Partial,
    /// No data or zero stars
    Empty,
}

/// Per-day figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub total_stars: u32,
    pub completed_tasks: usize,
    pub class: DayClass,
}

/// Figures for a span of days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    /// Display label, e.g. `2025-W41`, `2025-10`, `last-7-days`
    pub label: String,
    pub range: DateRange,
    pub total_stars: u32,
    pub full_days: u32,
    pub partial_days: u32,
    pub empty_days: u32,
    pub days: Vec<DaySummary>,
}

impl PeriodSummary {
    /// Share of days in the period that were fully completed (0.0 to 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.days.is_empty() {
            return 0.0;
        }
        f64::from(self.full_days) / self.days.len() as f64
    }
}

/// Rolling windows ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupPeriod {
    Day,
    Week,
    Month,
    Year,
}

impl RollupPeriod {
    pub fn days(&self) -> u32 {
        match self {
            RollupPeriod::Day => 1,
            RollupPeriod::Week => 7,
            RollupPeriod::Month => 30,
            RollupPeriod::Year => 365,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RollupPeriod::Day => "today".to_string(),
            other => format!("last-{}-days", other.days()),
        }
    }
}

/// Rolls day records up into calendar summaries
pub struct AggregationEngine<'a> {
    catalog: &'a TaskCatalog,
    rule: CompletionRule,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(catalog: &'a TaskCatalog) -> Self {
        Self {
            catalog,
            rule: CompletionRule::Any,
        }
    }

    pub fn with_rule(mut self, rule: CompletionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn classify(&self, record: Option<&DayRecord>) -> DayClass {
        match record {
            Some(r) if self.rule.is_day_complete(self.catalog, r) => DayClass::Full,
            Some(r) if r.total_stars() > 0 => DayClass::Partial,
            _ => DayClass::Empty,
        }
    }

    pub fn summarize_day(&self, date: NaiveDate, record: Option<&DayRecord>) -> DaySummary {
        DaySummary {
            date,
            total_stars: record.map(DayRecord::total_stars).unwrap_or(0),
            completed_tasks: record
                .map(|r| self.rule.completed_tasks(self.catalog, r))
                .unwrap_or(0),
            class: self.classify(record),
        }
    }

    /// One summary per date in `range`, oldest first.
    pub fn aggregate(
        &self,
        range: DateRange,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> Vec<DaySummary> {
        match live_today {
            Some(today) => {
                let view = LiveView::new(history, today);
                range
                    .days()
                    .map(|d| self.summarize_day(d, view.day(d)))
                    .collect()
            }
            None => range
                .days()
                .map(|d| self.summarize_day(d, history.day(d)))
                .collect(),
        }
    }

    pub fn summarize(
        &self,
        label: impl Into<String>,
        range: DateRange,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> PeriodSummary {
        let days = self.aggregate(range, history, live_today);
        let count = |class: DayClass| days.iter().filter(|d| d.class == class).count() as u32;

        PeriodSummary {
            label: label.into(),
            range,
            total_stars: days.iter().map(|d| d.total_stars).sum(),
            full_days: count(DayClass::Full),
            partial_days: count(DayClass::Partial),
            empty_days: count(DayClass::Empty),
            days,
        }
    }

    /// Rolling window ending on the live record's day.
    pub fn rollup(
        &self,
        period: RollupPeriod,
        history: &dyn DayLookup,
        today: &DayRecord,
    ) -> PeriodSummary {
        let range = DateRange::ending(today.date(), period.days());
        self.summarize(period.label(), range, history, Some(today))
    }

    /// ISO week (Monday to Sunday) containing `date`.
    pub fn calendar_week(
        &self,
        date: NaiveDate,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> PeriodSummary {
        let (label, range) = iso_week(date);
        self.summarize(label, range, history, live_today)
    }

    /// Calendar month containing `date`.
    pub fn calendar_month(
        &self,
        date: NaiveDate,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> PeriodSummary {
        let (label, range) = month(date);
        self.summarize(label, range, history, live_today)
    }

    /// Calendar year containing `date`.
    pub fn calendar_year(
        &self,
        date: NaiveDate,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> PeriodSummary {
        let (label, range) = year(date);
        self.summarize(label, range, history, live_today)
    }

    /// `range` split into ISO weeks, each clipped to `range`.
    pub fn weekly_breakdown(
        &self,
        range: DateRange,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> Vec<PeriodSummary> {
        self.breakdown(range, history, live_today, iso_week)
    }

    /// `range` split into calendar months, each clipped to `range`.
    pub fn monthly_breakdown(
        &self,
        range: DateRange,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
    ) -> Vec<PeriodSummary> {
        self.breakdown(range, history, live_today, month)
    }

    fn breakdown(
        &self,
        range: DateRange,
        history: &dyn DayLookup,
        live_today: Option<&DayRecord>,
        bucket: fn(NaiveDate) -> (String, DateRange),
    ) -> Vec<PeriodSummary> {
        let mut out = Vec::new();
        let mut cursor = range.start;
        while cursor <= range.end {
            let (label, full) = bucket(cursor);
            let clipped = DateRange::new(full.start.max(range.start), full.end.min(range.end));
            out.push(self.summarize(label, clipped, history, live_today));
            match full.end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }
}

fn iso_week(date: NaiveDate) -> (String, DateRange) {
    let week = date.iso_week();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (
        format!("{}-W{:02}", week.year(), week.week()),
        DateRange::new(monday, monday + Duration::days(6)),
    )
}

fn month(date: NaiveDate) -> (String, DateRange) {
    let first = date.with_day(1).unwrap_or(date);
    let next_first = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_first.and_then(|d| d.pred_opt()).unwrap_or(first);
    (
        format!("{}-{:02}", first.year(), first.month()),
        DateRange::new(first, last),
    )
}

fn year(date: NaiveDate) -> (String, DateRange) {
    let first = date.with_ordinal(1).unwrap_or(date);
    let last = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
    (date.year().to_string(), DateRange::new(first, last))
}
