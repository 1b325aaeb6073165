//! RawEvent to canonical Event conversion.
//!
//! This is a pure function over adapter output. It applies the fallbacks
//! and invariants the rest of the system relies on:
//!
//! - times normalized to UTC (all-day events stay date-only, end-exclusive),
//! - a non-empty title for every event,
//! - cancelled occurrences dropped,
//! - duplicate occurrence identities collapsed last-write-wins by the
//!   source-reported last-modified marker.

use std::collections::HashMap;

use unifeed_core::{Event, EventTime, OccurrenceId, SourceId};

use crate::raw_event::{RawEvent, RawEventTime};

/// Title used when a source reports an event without one.
pub const UNTITLED: &str = "Untitled Event";

/// Converts one raw event into its canonical form.
pub fn normalize_event(source: SourceId, raw: &RawEvent) -> Event {
    let start = convert_time(&raw.start);
    let end = fix_end(&start, convert_time(&raw.end));

    let title = raw
        .summary
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNTITLED);

    let occurrence = match &raw.instance {
        Some(marker) => OccurrenceId::instance(&raw.uid, marker),
        None => OccurrenceId::single(&raw.uid),
    };

    let mut event = Event::new(source, occurrence, start, end, title);
    event.description = raw
        .description
        .as_ref()
        .filter(|d| !d.is_empty())
        .cloned();
    event.location = raw.location.as_ref().filter(|l| !l.is_empty()).cloned();
    event.source_timezone = raw.timezone.clone();
    event.last_modified = raw.last_modified;
    event
}

/// Normalizes a batch of raw events from one source.
///
/// Cancelled events are dropped. When an adapter emits the same occurrence
/// identity more than once, the copy with the newest last-modified marker
/// wins; an unstamped copy never replaces a stamped one, and on equal
/// markers the later position wins.
pub fn normalize_events(source: SourceId, raw_events: &[RawEvent]) -> Vec<Event> {
    let mut by_occurrence: HashMap<OccurrenceId, Event> = HashMap::new();

    for raw in raw_events.iter().filter(|e| !e.is_cancelled()) {
        let event = normalize_event(source, raw);
        match by_occurrence.get(&event.occurrence) {
            Some(existing) if event.last_modified < existing.last_modified => {}
            _ => {
                by_occurrence.insert(event.occurrence.clone(), event);
            }
        }
    }

    let mut events: Vec<Event> = by_occurrence.into_values().collect();
    events.sort_by_key(Event::sort_key);
    events
}

fn convert_time(raw: &RawEventTime) -> EventTime {
    match raw {
        RawEventTime::DateTime(dt) => EventTime::from_utc(*dt),
        RawEventTime::Date(d) => EventTime::from_date(*d),
    }
}

/// Repairs degenerate ranges: an all-day event whose end is not after its
/// start gets the end-exclusive one-day range; a timed event whose end
/// precedes its start collapses to a zero-length range at the start.
fn fix_end(start: &EventTime, end: EventTime) -> EventTime {
    match (start, &end) {
        (EventTime::AllDay(s), EventTime::AllDay(e)) if e <= s => {
            EventTime::from_date(s.succ_opt().unwrap_or(*s))
        }
        (EventTime::DateTime(s), EventTime::DateTime(e)) if e < s => EventTime::from_utc(*s),
        _ => end,
    }
}
