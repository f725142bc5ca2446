//! Historical day records fetched once per window.
//!
//! The streak walk and the calendar rollups both read from one
//! [`HistoryWindow`] instead of querying the remote per task per day.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::parse_date_key;
use crate::day_record::{parse_status_map, DayRecord};

/// Read access to past days.
pub trait DayLookup {
    /// The record for `date`, or `None` when nothing was recorded.
    fn day(&self, date: NaiveDate) -> Option<&DayRecord>;
}

impl DayLookup for BTreeMap<NaiveDate, DayRecord> {
    fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.get(&date)
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range from `start` to `end`; swapped bounds are reordered.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The `days` days ending at `end` (inclusive). `days == 0` is treated as 1.
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1) - 1);
        Self::new(end - Duration::days(span), end)
    }

    pub fn num_days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Dates in ascending order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take_while({
            let end = self.end;
            move |d| *d <= end
        })
    }
}

/// Days up to and including `end`, as returned by the history collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    end: NaiveDate,
    days: BTreeMap<NaiveDate, DayRecord>,
}

impl HistoryWindow {
    pub fn empty(end: NaiveDate) -> Self {
        Self {
            end,
            days: BTreeMap::new(),
        }
    }

    pub fn from_records(end: NaiveDate, records: impl IntoIterator<Item = DayRecord>) -> Self {
        let mut window = Self::empty(end);
        for record in records {
            window.insert(record);
        }
        window
    }

    /// Parse a `{date: {task: level}}` payload. Unparseable dates and days
    /// after `end` are dropped; malformed levels read as unset.
    pub fn from_wire(end: NaiveDate, payload: &serde_json::Value) -> Self {
        let mut window = Self::empty(end);
        let Some(object) = payload.as_object() else {
            debug!("history payload is not an object, treating as empty");
            return window;
        };

        for (key, status) in object {
            match parse_date_key(key) {
                Ok(date) => {
                    window.insert(DayRecord::from_status(date, &parse_status_map(status)));
                }
                Err(e) => debug!(error = %e, "skipping history entry"),
            }
        }
        window
    }

    /// Add or replace a day. Days after the window end are ignored.
    pub fn insert(&mut self, record: DayRecord) {
        if record.date() <= self.end {
            self.days.insert(record.date(), record);
        }
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Earliest recorded day, if any.
    pub fn first_day(&self) -> Option<NaiveDate> {
        self.days.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Records newest first.
    pub fn iter_desc(&self) -> impl Iterator<Item = &DayRecord> {
        self.days.values().rev()
    }
}

impl DayLookup for HistoryWindow {
    fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&date)
    }
}

/// History with today's live record laid over it.
pub struct LiveView<'a> {
    history: &'a dyn DayLookup,
    today: &'a DayRecord,
}

impl<'a> LiveView<'a> {
    pub fn new(history: &'a dyn DayLookup, today: &'a DayRecord) -> Self {
        Self { history, today }
    }
}

impl DayLookup for LiveView<'_> {
    fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        if date == self.today.date() {
            Some(self.today)
        } else {
            self.history.day(date)
        }
    }
}
