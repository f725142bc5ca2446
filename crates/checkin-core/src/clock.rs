//! Wall clock and reference timezone.
//!
//! All day-boundary logic ("which date is today", "has the day rolled over")
//! runs in one explicitly configured reference zone so that streaks agree
//! across devices. The machine's local zone is never consulted.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};

/// Format of every date exchanged with collaborators.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Source of the current instant. Swappable so tests can cross midnight.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The single timezone in which calendar dates are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct ReferenceZone {
    offset: FixedOffset,
}

impl ReferenceZone {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Zone `minutes` east of UTC.
    ///
    /// # Errors
    /// Returns an error when the offset is not strictly within ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, ConfigError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(|offset| Self { offset })
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "timezone.utc_offset_minutes".into(),
                message: format!("{minutes} is not a valid UTC offset"),
            })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// Calendar date of `instant` in this zone.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.date_of(clock.now())
    }
}

impl Default for ReferenceZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl TryFrom<i32> for ReferenceZone {
    type Error = ConfigError;

    fn try_from(minutes: i32) -> Result<Self, Self::Error> {
        Self::from_offset_minutes(minutes)
    }
}

impl From<ReferenceZone> for i32 {
    fn from(zone: ReferenceZone) -> Self {
        zone.offset_minutes()
    }
}

/// Canonical `YYYY-MM-DD` key for `date`.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Parse a canonical date key.
pub fn parse_date_key(key: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(key.trim(), DATE_KEY_FORMAT)
        .map_err(|_| ValidationError::InvalidDate(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_follows_reference_zone_not_utc() {
        // 2025-03-01 20:30 UTC is already 2025-03-02 in UTC+8.
        let instant = Utc.with_ymd_and_hms(2025, 3, 1, 20, 30, 0).unwrap();
        let shanghai = ReferenceZone::from_offset_minutes(8 * 60).unwrap();
        let new_york = ReferenceZone::from_offset_minutes(-5 * 60).unwrap();

        assert_eq!(shanghai.date_of(instant), NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
        assert_eq!(new_york.date_of(instant), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(ReferenceZone::utc().date_of(instant), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn rejects_out_of_range_offsets() {
        assert!(ReferenceZone::from_offset_minutes(24 * 60).is_err());
        assert!(ReferenceZone::from_offset_minutes(i32::MAX).is_err());
        assert_eq!(ReferenceZone::from_offset_minutes(-90).unwrap().offset_minutes(), -90);
    }

    #[test]
    fn manual_clock_crosses_midnight() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 0).unwrap());
        let zone = ReferenceZone::utc();
        assert_eq!(zone.today(&clock), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        clock.advance(Duration::minutes(2));
        assert_eq!(zone.today(&clock), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    }

    #[test]
    fn date_keys_round_trip() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        assert_eq!(date_key(date), "2025-10-06");
        assert_eq!(parse_date_key("2025-10-06").unwrap(), date);
        assert!(parse_date_key("06/10/2025").is_err());
    }
}
