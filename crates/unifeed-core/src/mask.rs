//! Privacy masking transform.
//!
//! Maps a canonical [`Event`] to what the published feed is allowed to show
//! for its source. `BusyOnly` keeps the time range and replaces every
//! detail field with a fixed placeholder; no masked field may leak through
//! any other field.

use crate::event::Event;
use crate::source::MaskingPolicy;

/// The placeholder title emitted for masked events.
pub const BUSY_PLACEHOLDER: &str = "Busy";

/// Applies a source's masking policy to one event.
///
/// With `Off` the event passes through unchanged. With `BusyOnly` the
/// result keeps the occurrence identity and time range but carries the
/// placeholder title and no description or location. The last-modified
/// marker survives masking so feed serialization stays deterministic.
pub fn apply_masking(event: &Event, policy: MaskingPolicy) -> Event {
    match policy {
        MaskingPolicy::Off => event.clone(),
        MaskingPolicy::BusyOnly => Event {
            source: event.source,
            occurrence: event.occurrence.clone(),
            start: event.start.clone(),
            end: event.end.clone(),
            title: BUSY_PLACEHOLDER.to_string(),
            description: None,
            location: None,
            source_timezone: event.source_timezone.clone(),
            last_modified: event.last_modified,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OccurrenceId;
    use crate::source::SourceId;
    use crate::time::EventTime;
    use chrono::{TimeZone, Utc};

    fn sample_event() -> Event {
        Event::new(
            SourceId(1),
            OccurrenceId::single("evt-1"),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 9, 0, 0).unwrap()),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 10, 0, 0).unwrap()),
            "Salary negotiation",
        )
        .with_description("Bring the numbers")
        .with_location("HR corner office")
    }

    #[test]
    fn off_passes_through() {
        let event = sample_event();
        assert_eq!(apply_masking(&event, MaskingPolicy::Off), event);
    }

    #[test]
    fn busy_only_strips_details() {
        let event = sample_event();
        let masked = apply_masking(&event, MaskingPolicy::BusyOnly);

        assert_eq!(masked.title, BUSY_PLACEHOLDER);
        assert!(masked.description.is_none());
        assert!(masked.location.is_none());
        // Time range and identity survive
        assert_eq!(masked.start, event.start);
        assert_eq!(masked.end, event.end);
        assert_eq!(masked.occurrence, event.occurrence);
    }

    #[test]
    fn busy_only_leaks_no_original_text() {
        let event = sample_event();
        let masked = apply_masking(&event, MaskingPolicy::BusyOnly);
        let serialized = serde_json::to_string(&masked).unwrap();

        for secret in ["Salary", "negotiation", "numbers", "corner office"] {
            assert!(
                !serialized.contains(secret),
                "masked event leaked {secret:?}: {serialized}"
            );
        }
    }
}
