//! Canonical event representation.
//!
//! [`Event`] is the unified shape every source adapter's output is
//! normalized into before it reaches the store and the feed. Its identity
//! within a source is the [`OccurrenceId`]: the source-native UID plus an
//! optional recurrence-instance marker, so one meeting and one instance of
//! a recurring series are equally addressable for idempotent upserts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceId;
use crate::time::EventTime;

/// Stable identity of one concrete occurrence within a source.
///
/// For a plain event this is just the source-native UID. For an instance of
/// a recurring series, `instance` carries the occurrence's original start in
/// iCalendar basic format (see [`EventTime::ics_marker`]), which matches the
/// RECURRENCE-ID convention used by overridden instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OccurrenceId {
    /// Source-native event UID.
    pub uid: String,
    /// Recurrence-instance marker, if this is one instance of a series.
    pub instance: Option<String>,
}

impl OccurrenceId {
    /// Identity of a non-recurring event.
    pub fn single(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            instance: None,
        }
    }

    /// Identity of one instance of a recurring series.
    pub fn instance(uid: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            instance: Some(marker.into()),
        }
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(marker) => write!(f, "{}:{}", self.uid, marker),
            None => write!(f, "{}", self.uid),
        }
    }
}

/// Canonical representation of one event occurrence.
///
/// Owned exclusively by its source: the store replaces a source's event set
/// wholesale on each successful sync, keyed by [`OccurrenceId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The source this occurrence belongs to.
    pub source: SourceId,
    /// Stable occurrence identity within the source.
    pub occurrence: OccurrenceId,
    /// Start of the occurrence (UTC instant or all-day date).
    pub start: EventTime,
    /// End of the occurrence. All-day ends are exclusive: the first day
    /// NOT included in the event.
    pub end: EventTime,
    /// Event title.
    pub title: String,
    /// Event description, if any.
    pub description: Option<String>,
    /// Event location, if any.
    pub location: Option<String>,
    /// Origin timezone as reported by the source (IANA identifier),
    /// preserved for display even though instants are stored in UTC.
    pub source_timezone: Option<String>,
    /// Source-reported last-modified marker. Used to collapse duplicate
    /// occurrences and to detect no-op updates.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Event {
    /// Creates an event with the required fields.
    pub fn new(
        source: SourceId,
        occurrence: OccurrenceId,
        start: EventTime,
        end: EventTime,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source,
            occurrence,
            start,
            end,
            title: title.into(),
            description: None,
            location: None,
            source_timezone: None,
            last_modified: None,
        }
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to set the origin timezone.
    pub fn with_source_timezone(mut self, tz: impl Into<String>) -> Self {
        self.source_timezone = Some(tz.into());
        self
    }

    /// Builder method to set the last-modified marker.
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Returns `true` if this is an all-day occurrence.
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    /// The key used for the feed's stable ordering: start instant, then
    /// source, then occurrence identity. Two generations over unchanged
    /// input sort identically, byte for byte.
    pub fn sort_key(&self) -> (DateTime<Utc>, SourceId, OccurrenceId) {
        (
            self.start.to_utc_datetime(),
            self.source,
            self.occurrence.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn occurrence_id_display() {
        assert_eq!(OccurrenceId::single("abc").to_string(), "abc");
        assert_eq!(
            OccurrenceId::instance("abc", "20250205T100000Z").to_string(),
            "abc:20250205T100000Z"
        );
    }

    #[test]
    fn occurrence_id_ordering() {
        let plain = OccurrenceId::single("abc");
        let inst1 = OccurrenceId::instance("abc", "20250205T100000Z");
        let inst2 = OccurrenceId::instance("abc", "20250212T100000Z");

        // None sorts before Some, instances sort by marker
        assert!(plain < inst1);
        assert!(inst1 < inst2);
    }

    #[test]
    fn event_builder() {
        let event = Event::new(
            SourceId(1),
            OccurrenceId::single("evt-1"),
            EventTime::from_utc(utc(2025, 2, 5, 9, 0, 0)),
            EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0)),
            "Team Meeting",
        )
        .with_description("Weekly sync")
        .with_location("Room 101")
        .with_source_timezone("Europe/Istanbul")
        .with_last_modified(utc(2025, 2, 1, 0, 0, 0));

        assert_eq!(event.title, "Team Meeting");
        assert_eq!(event.description.as_deref(), Some("Weekly sync"));
        assert_eq!(event.location.as_deref(), Some("Room 101"));
        assert_eq!(event.source_timezone.as_deref(), Some("Europe/Istanbul"));
        assert!(!event.is_all_day());
    }

    #[test]
    fn sort_key_orders_by_start_then_source() {
        let a = Event::new(
            SourceId(2),
            OccurrenceId::single("a"),
            EventTime::from_utc(utc(2025, 2, 5, 9, 0, 0)),
            EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0)),
            "A",
        );
        let b = Event::new(
            SourceId(1),
            OccurrenceId::single("b"),
            EventTime::from_utc(utc(2025, 2, 5, 9, 30, 0)),
            EventTime::from_utc(utc(2025, 2, 5, 10, 30, 0)),
            "B",
        );
        assert!(a.sort_key() < b.sort_key());

        // Same start: source id breaks the tie
        let c = Event::new(
            SourceId(1),
            OccurrenceId::single("c"),
            EventTime::from_utc(utc(2025, 2, 5, 9, 0, 0)),
            EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0)),
            "C",
        );
        assert!(c.sort_key() < a.sort_key());
    }

    #[test]
    fn serde_roundtrip() {
        let event = Event::new(
            SourceId(1),
            OccurrenceId::instance("evt-1", "20250205T090000Z"),
            EventTime::from_utc(utc(2025, 2, 5, 9, 0, 0)),
            EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0)),
            "Standup",
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
