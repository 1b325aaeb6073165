//! iCalendar (RFC 5545) parsing and recurrence expansion.
//!
//! Both the CalDAV and the static-feed adapters receive wire-format
//! iCalendar documents. This module parses them and expands recurring
//! series into concrete occurrences within the fetch window:
//!
//! - plain VEVENTs pass through (filtered to the window),
//! - VEVENTs with an RRULE are expanded with the `rrule` crate, honoring
//!   EXDATE entries,
//! - VEVENTs with a RECURRENCE-ID override the generated instance with the
//!   same occurrence identity; a cancelled override suppresses it.
//!
//! Servers that pre-expand recurring events return several VEVENTs sharing
//! one UID; those get per-occurrence instance markers so their identities
//! stay unique within the source.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use icalendar::parser::{self, Component};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use tracing::warn;

use unifeed_core::TimeWindow;

use crate::error::{AdapterError, AdapterResult};
use crate::raw_event::{RawEvent, RawEventTime};

/// Hard cap on instances expanded from one series per fetch.
const MAX_EXPANSION: u16 = 366;

/// One VEVENT as read from the document, before expansion.
#[derive(Debug, Clone)]
struct ParsedVevent {
    uid: String,
    start: RawEventTime,
    end: Option<RawEventTime>,
    tzid: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    rrule: Option<String>,
    exdates: Vec<RawEventTime>,
    recurrence_id: Option<RawEventTime>,
}

/// Parses an iCalendar document and returns the concrete occurrences
/// overlapping `window`.
///
/// # Errors
///
/// Returns `MalformedSource` if the document itself is not parsable.
/// Individual defective events (missing DTSTART, broken RRULE) are skipped
/// with a warning so one bad entry does not take down the whole source.
pub fn parse_ics_content(ics: &str, window: &TimeWindow) -> AdapterResult<Vec<RawEvent>> {
    let unfolded = parser::unfold(ics);
    let calendar = parser::read_calendar(&unfolded)
        .map_err(|e| AdapterError::malformed_source(format!("invalid iCalendar document: {e}")))?;

    let mut masters = Vec::new();
    let mut overrides: HashMap<(String, String), ParsedVevent> = HashMap::new();
    let mut plain = Vec::new();

    for component in calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT")
    {
        let Some(vevent) = parse_vevent(component) else {
            continue;
        };
        if let Some(ref rid) = vevent.recurrence_id {
            let key = (vevent.uid.clone(), rid.ics_marker());
            overrides.insert(key, vevent);
        } else if vevent.rrule.is_some() {
            masters.push(vevent);
        } else {
            plain.push(vevent);
        }
    }

    let mut events = Vec::new();
    let mut consumed: HashSet<(String, String)> = HashSet::new();

    // Plain events. A UID appearing more than once means the server already
    // expanded a series; each copy then needs an instance marker.
    let mut uid_counts: HashMap<&str, usize> = HashMap::new();
    for vevent in &plain {
        *uid_counts.entry(vevent.uid.as_str()).or_default() += 1;
    }
    for vevent in &plain {
        if vevent.is_cancelled() {
            continue;
        }
        let instance = (uid_counts[vevent.uid.as_str()] > 1).then(|| vevent.start.ics_marker());
        let raw = to_raw(vevent, vevent.start.clone(), effective_end(vevent), instance);
        if overlaps_window(&raw, window) {
            events.push(raw);
        }
    }

    // Recurring series.
    for master in &masters {
        if master.is_cancelled() {
            continue;
        }
        events.extend(expand_master(master, window, &overrides, &mut consumed));
    }

    // Overridden instances whose generated counterpart fell outside the
    // expansion (e.g. an occurrence moved into the window from outside it).
    for ((uid, marker), vevent) in &overrides {
        if consumed.contains(&(uid.clone(), marker.clone())) || vevent.is_cancelled() {
            continue;
        }
        let raw = to_raw(
            vevent,
            vevent.start.clone(),
            effective_end(vevent),
            Some(marker.clone()),
        );
        if overlaps_window(&raw, window) {
            events.push(raw);
        }
    }

    Ok(events)
}

impl ParsedVevent {
    fn is_cancelled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    }
}

/// Reads the fields of one VEVENT. Returns `None` (with a warning) when a
/// required field is missing or unparsable.
fn parse_vevent(component: &Component) -> Option<ParsedVevent> {
    let uid = match component.find_prop("UID") {
        Some(p) => p.val.to_string(),
        None => {
            warn!("skipping VEVENT without UID");
            return None;
        }
    };

    let dtstart = component.find_prop("DTSTART")?;
    let Ok(start_dpt) = DatePerhapsTime::try_from(dtstart) else {
        warn!(uid = %uid, "skipping VEVENT with unparsable DTSTART");
        return None;
    };
    let (start, tzid) = convert_date_time(start_dpt);

    let end = component
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| convert_date_time(dpt).0);

    let last_modified = component
        .find_prop("LAST-MODIFIED")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| convert_date_time(dpt).0.to_utc());

    let recurrence_id = component
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| convert_date_time(dpt).0);

    let rrule = component.find_prop("RRULE").map(|p| p.val.to_string());

    let exdates = component
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(|p| parse_exdate_values(p.val.as_ref(), tzid.as_deref()))
        .collect();

    Some(ParsedVevent {
        uid,
        start,
        end,
        tzid,
        summary: component.find_prop("SUMMARY").map(|p| p.val.to_string()),
        description: component.find_prop("DESCRIPTION").map(|p| p.val.to_string()),
        location: component.find_prop("LOCATION").map(|p| p.val.to_string()),
        status: component.find_prop("STATUS").map(|p| p.val.to_string()),
        last_modified,
        rrule,
        exdates,
        recurrence_id,
    })
}

/// Converts an icalendar date-or-datetime to a UTC [`RawEventTime`],
/// returning the origin TZID when one was attached.
fn convert_date_time(dpt: DatePerhapsTime) -> (RawEventTime, Option<String>) {
    match dpt {
        DatePerhapsTime::Date(date) => (RawEventTime::Date(date), None),
        DatePerhapsTime::DateTime(cdt) => match cdt {
            CalendarDateTime::Utc(dt) => (RawEventTime::DateTime(dt), None),
            CalendarDateTime::Floating(naive) => {
                // Floating times are taken as UTC.
                (RawEventTime::DateTime(Utc.from_utc_datetime(&naive)), None)
            }
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                let utc = tzid
                    .parse::<chrono_tz::Tz>()
                    .ok()
                    .and_then(|tz| tz.from_local_datetime(&date_time).single())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&date_time));
                (RawEventTime::DateTime(utc), Some(tzid))
            }
        },
    }
}

/// Parses the comma-separated values of one EXDATE property.
///
/// Naive datetimes are resolved in the series' timezone when known.
fn parse_exdate_values(value: &str, tzid: Option<&str>) -> Vec<RawEventTime> {
    value
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            if let Some(stripped) = token.strip_suffix('Z') {
                let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
                return Some(RawEventTime::DateTime(Utc.from_utc_datetime(&naive)));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S") {
                let utc = tzid
                    .and_then(|id| id.parse::<chrono_tz::Tz>().ok())
                    .and_then(|tz| tz.from_local_datetime(&naive).single())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
                return Some(RawEventTime::DateTime(utc));
            }
            NaiveDate::parse_from_str(token, "%Y%m%d")
                .ok()
                .map(RawEventTime::Date)
        })
        .collect()
}

/// The end time of a VEVENT, with the RFC-consistent defaults when DTEND is
/// absent: one hour for timed events, one day for all-day events.
fn effective_end(vevent: &ParsedVevent) -> RawEventTime {
    match (&vevent.start, &vevent.end) {
        (_, Some(end)) => end.clone(),
        (RawEventTime::DateTime(dt), None) => RawEventTime::DateTime(*dt + chrono::Duration::hours(1)),
        (RawEventTime::Date(d), None) => {
            RawEventTime::Date(d.succ_opt().unwrap_or(*d))
        }
    }
}

fn overlaps_window(raw: &RawEvent, window: &TimeWindow) -> bool {
    raw.start.to_utc() < window.end && raw.end.to_utc() > window.start
}

fn to_raw(
    vevent: &ParsedVevent,
    start: RawEventTime,
    end: RawEventTime,
    instance: Option<String>,
) -> RawEvent {
    let mut raw = RawEvent::new(vevent.uid.clone(), start, end);
    raw.instance = instance;
    raw.summary = vevent.summary.clone();
    raw.description = vevent.description.clone();
    raw.location = vevent.location.clone();
    raw.timezone = vevent.tzid.clone();
    raw.status = vevent.status.clone();
    raw.last_modified = vevent.last_modified;
    raw
}

/// Builds the input string for the `rrule` crate's parser: DTSTART, the
/// rule, and EXDATE lines, all normalized to UTC basic format.
fn build_rrule_input(master: &ParsedVevent, rrule: &str) -> String {
    let mut lines = Vec::with_capacity(2 + master.exdates.len());

    let dtstart = match &master.start {
        RawEventTime::Date(d) => format!("DTSTART:{}T000000Z", d.format("%Y%m%d")),
        RawEventTime::DateTime(dt) => format!("DTSTART:{}", dt.format("%Y%m%dT%H%M%SZ")),
    };
    lines.push(dtstart);
    lines.push(format!("RRULE:{rrule}"));

    for exdate in &master.exdates {
        let line = match exdate {
            RawEventTime::Date(d) => format!("EXDATE:{}T000000Z", d.format("%Y%m%d")),
            RawEventTime::DateTime(dt) => format!("EXDATE:{}", dt.format("%Y%m%dT%H%M%SZ")),
        };
        lines.push(line);
    }

    lines.join("\n")
}

/// Expands one recurring master into concrete occurrences within `window`.
///
/// Overridden instances replace the generated occurrence with the same
/// identity; their keys are recorded in `consumed`. The master itself is
/// never emitted, only instances.
fn expand_master(
    master: &ParsedVevent,
    window: &TimeWindow,
    overrides: &HashMap<(String, String), ParsedVevent>,
    consumed: &mut HashSet<(String, String)>,
) -> Vec<RawEvent> {
    let rrule = master.rrule.as_deref().unwrap_or_default();
    let input = build_rrule_input(master, rrule);

    let rrule_set: rrule::RRuleSet = match input.parse() {
        Ok(set) => set,
        Err(e) => {
            warn!(uid = %master.uid, error = %e, "skipping series with unparsable RRULE");
            return Vec::new();
        }
    };

    // after/before are exclusive bounds; widen by one second on the start
    // side so an occurrence exactly at window.start is kept, and leave the
    // end side as-is to preserve the half-open window.
    let tz: rrule::Tz = Utc.into();
    let after = (window.start - chrono::Duration::seconds(1)).with_timezone(&tz);
    let before = window.end.with_timezone(&tz);
    let result = rrule_set.after(after).before(before).all(MAX_EXPANSION);

    // Duration of one occurrence, carried over from the master.
    let timed_duration = match (&master.start, master.end.as_ref()) {
        (RawEventTime::DateTime(s), Some(RawEventTime::DateTime(e))) => *e - *s,
        _ => chrono::Duration::hours(1),
    };
    let all_day_span = match (&master.start, master.end.as_ref()) {
        (RawEventTime::Date(s), Some(RawEventTime::Date(e))) => (*e - *s).num_days().max(1),
        _ => 1,
    };

    let mut events = Vec::new();
    for occurrence in &result.dates {
        let (start, end) = match &master.start {
            RawEventTime::Date(_) => {
                let date = occurrence.date_naive();
                (
                    RawEventTime::Date(date),
                    RawEventTime::Date(date + chrono::Duration::days(all_day_span)),
                )
            }
            RawEventTime::DateTime(_) => {
                let start = occurrence.with_timezone(&Utc);
                (
                    RawEventTime::DateTime(start),
                    RawEventTime::DateTime(start + timed_duration),
                )
            }
        };

        let marker = start.ics_marker();
        let key = (master.uid.clone(), marker.clone());

        if let Some(replacement) = overrides.get(&key) {
            consumed.insert(key);
            if replacement.is_cancelled() {
                continue;
            }
            events.push(to_raw(
                replacement,
                replacement.start.clone(),
                effective_end(replacement),
                Some(marker),
            ));
        } else {
            events.push(to_raw(master, start, end, Some(marker)));
        }
    }

    events
}
