//! Raw event type produced by source adapters.
//!
//! [`RawEvent`] is the adapter-agnostic shape of one fetched occurrence
//! before normalization: times already lifted out of the wire format but
//! duplicates not yet collapsed and fallbacks not yet applied. Recurring
//! series are expanded by the adapters, so every `RawEvent` is one concrete
//! occurrence.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The time of a raw event: a UTC instant or an all-day date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum RawEventTime {
    /// A specific datetime, converted to UTC by the adapter.
    DateTime(DateTime<Utc>),
    /// An all-day event date.
    Date(NaiveDate),
}

impl RawEventTime {
    /// Returns `true` if this is an all-day time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// UTC instant for window checks; all-day dates map to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::Date(d) => d.and_hms_opt(0, 0, 0).expect("valid time").and_utc(),
        }
    }

    /// iCalendar basic format, used for recurrence-instance markers.
    pub fn ics_marker(&self) -> String {
        match self {
            Self::DateTime(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            Self::Date(d) => d.format("%Y%m%d").to_string(),
        }
    }
}

/// One fetched occurrence, as returned by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source-native event UID.
    pub uid: String,
    /// Recurrence-instance marker when this is one instance of a series.
    pub instance: Option<String>,
    /// Occurrence start.
    pub start: RawEventTime,
    /// Occurrence end.
    pub end: RawEventTime,
    /// Event title, if present.
    pub summary: Option<String>,
    /// Event description, if present.
    pub description: Option<String>,
    /// Event location, if present.
    pub location: Option<String>,
    /// Origin timezone (IANA identifier), if the source reported one.
    pub timezone: Option<String>,
    /// Event status as reported ("confirmed", "cancelled", ...).
    pub status: Option<String>,
    /// Source-reported last-modified instant.
    pub last_modified: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Creates a raw event with the required fields.
    pub fn new(uid: impl Into<String>, start: RawEventTime, end: RawEventTime) -> Self {
        Self {
            uid: uid.into(),
            instance: None,
            start,
            end,
            summary: None,
            description: None,
            location: None,
            timezone: None,
            status: None,
            last_modified: None,
        }
    }

    /// Builder method to mark this as one instance of a recurring series.
    pub fn with_instance(mut self, marker: impl Into<String>) -> Self {
        self.instance = Some(marker.into());
        self
    }

    /// Builder method to set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
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
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Builder method to set the last-modified marker.
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Returns `true` if the source reported this event as cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    }

    /// Returns `true` if this is an all-day occurrence.
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }
}
