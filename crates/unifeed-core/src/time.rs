//! Time types for calendar events.
//!
//! This module provides [`EventTime`] for representing event start/end times
//! (which may be either a specific datetime or an all-day date), and
//! [`TimeWindow`] for defining fetch ranges.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Represents the time of a calendar event.
///
/// Calendar events can have two kinds of times:
/// - **DateTime**: a specific point in time, stored in UTC
/// - **AllDay**: a date without a time component
///
/// All-day ranges follow the iCalendar end-exclusive convention: the end
/// date is the first day *not* included in the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::DateTime` from a datetime in any timezone.
    pub fn from_zoned<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns `true` if this is a specific datetime.
    pub fn is_datetime(&self) -> bool {
        matches!(self, Self::DateTime(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Returns the date if this is an `AllDay` variant.
    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Self::AllDay(d) => Some(d),
            Self::DateTime(_) => None,
        }
    }

    /// Converts to a UTC datetime for comparison purposes.
    ///
    /// For all-day events, returns midnight UTC on that date.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_hms_opt(0, 0, 0).expect("valid time").and_utc(),
        }
    }

    /// Returns the date portion of this event time.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::DateTime(dt) => dt.date_naive(),
            Self::AllDay(date) => *date,
        }
    }

    /// Formats this time in iCalendar basic format.
    ///
    /// `20250205T100000Z` for datetimes, `20250205` for all-day dates.
    /// This is the canonical form used for recurrence-instance markers.
    pub fn ics_marker(&self) -> String {
        match self {
            Self::DateTime(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            Self::AllDay(date) => date.format("%Y%m%d").to_string(),
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

/// A time window for fetching calendar events.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates a window around `now`: `now - lookbehind` to `now + lookahead`.
    pub fn around(now: DateTime<Utc>, lookbehind: Duration, lookahead: Duration) -> Self {
        Self::new(now - lookbehind, now + lookahead)
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    ///
    /// Uses half-open interval semantics: `[start, end)`.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Checks if an event with the given start and end times overlaps this window.
    ///
    /// An event overlaps if it starts before the window ends AND ends after
    /// the window starts.
    pub fn overlaps(&self, event_start: &EventTime, event_end: &EventTime) -> bool {
        let start = event_start.to_utc_datetime();
        let end = event_end.to_utc_datetime();
        start < self.end && end > self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    mod event_time {
        use super::*;

        #[test]
        fn datetime_creation() {
            let dt = utc(2025, 2, 5, 10, 30, 0);
            let et = EventTime::from_utc(dt);
            assert!(et.is_datetime());
            assert!(!et.is_all_day());
            assert_eq!(et.as_datetime(), Some(&dt));
            assert_eq!(et.as_date(), None);
        }

        #[test]
        fn allday_creation() {
            let d = date(2025, 2, 5);
            let et = EventTime::from_date(d);
            assert!(et.is_all_day());
            assert_eq!(et.as_date(), Some(&d));
        }

        #[test]
        fn to_utc_datetime() {
            let dt = utc(2025, 2, 5, 10, 30, 0);
            assert_eq!(EventTime::from_utc(dt).to_utc_datetime(), dt);
            assert_eq!(
                EventTime::from_date(date(2025, 2, 5)).to_utc_datetime(),
                utc(2025, 2, 5, 0, 0, 0)
            );
        }

        #[test]
        fn ics_marker_format() {
            assert_eq!(
                EventTime::from_utc(utc(2025, 2, 5, 10, 30, 0)).ics_marker(),
                "20250205T103000Z"
            );
            assert_eq!(EventTime::from_date(date(2025, 2, 5)).ics_marker(), "20250205");
        }

        #[test]
        fn ordering() {
            let et1 = EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0));
            let et2 = EventTime::from_utc(utc(2025, 2, 5, 11, 0, 0));
            let et3 = EventTime::from_date(date(2025, 2, 5));

            assert!(et3 < et1); // midnight < 10:00
            assert!(et1 < et2);
        }

        #[test]
        fn serde_roundtrip() {
            let et = EventTime::from_utc(utc(2025, 2, 5, 10, 30, 0));
            let json = serde_json::to_string(&et).unwrap();
            let parsed: EventTime = serde_json::from_str(&json).unwrap();
            assert_eq!(et, parsed);
        }
    }

    mod time_window {
        use super::*;

        #[test]
        fn creation_and_duration() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));
            assert_eq!(window.duration(), Duration::hours(8));
        }

        #[test]
        #[should_panic(expected = "start must be <= end")]
        fn invalid_window() {
            TimeWindow::new(utc(2025, 2, 5, 17, 0, 0), utc(2025, 2, 5, 9, 0, 0));
        }

        #[test]
        fn around_now() {
            let now = utc(2025, 2, 5, 12, 0, 0);
            let window = TimeWindow::around(now, Duration::days(30), Duration::days(365));
            assert_eq!(window.start, utc(2025, 1, 6, 12, 0, 0));
            assert_eq!(window.end, utc(2026, 2, 5, 12, 0, 0));
        }

        #[test]
        fn contains_half_open() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));
            assert!(window.contains(utc(2025, 2, 5, 9, 0, 0)));
            assert!(!window.contains(utc(2025, 2, 5, 17, 0, 0)));
        }

        #[test]
        fn overlaps_event() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));

            // Event straddling the window start
            let start = EventTime::from_utc(utc(2025, 2, 5, 8, 0, 0));
            let end = EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0));
            assert!(window.overlaps(&start, &end));

            // Event ending exactly at window start does not overlap
            let start = EventTime::from_utc(utc(2025, 2, 5, 8, 0, 0));
            let end = EventTime::from_utc(utc(2025, 2, 5, 9, 0, 0));
            assert!(!window.overlaps(&start, &end));

            // Event starting at window end does not overlap
            let start = EventTime::from_utc(utc(2025, 2, 5, 17, 0, 0));
            let end = EventTime::from_utc(utc(2025, 2, 5, 18, 0, 0));
            assert!(!window.overlaps(&start, &end));
        }
    }
}
