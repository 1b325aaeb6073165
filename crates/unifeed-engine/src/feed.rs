//! Feed generation.
//!
//! Serializes a user's unified event set into an iCalendar document any
//! standards-compliant client can subscribe to. Generation reads only
//! already-persisted data (no network, no source status checks that could
//! fail), so feed requests stay fast and independent of source health.
//!
//! Output is byte-deterministic for unchanged input: entries are sorted by
//! (start, source, occurrence identity) and every DTSTAMP derives from the
//! event's own last-modified marker, never from the generation time. That
//! stability is what lets conditional-refresh clients rely on the digest.

use std::sync::Arc;

use icalendar::{Calendar, Component, DatePerhapsTime, EventLike};
use sha2::{Digest, Sha256};
use tracing::debug;

use unifeed_core::{Event, EventTime, UserId, apply_masking};

use crate::registry::SourceRegistry;
use crate::store::UnifiedStore;
use crate::tokens::FeedTokenRegistry;

/// Generates the serialized feed for a user.
pub struct FeedGenerator {
    registry: Arc<SourceRegistry>,
    store: Arc<UnifiedStore>,
    tokens: Arc<FeedTokenRegistry>,
}

impl FeedGenerator {
    /// Creates a generator over the given collaborators.
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<UnifiedStore>,
        tokens: Arc<FeedTokenRegistry>,
    ) -> Self {
        Self {
            registry,
            store,
            tokens,
        }
    }

    /// Generates the unified calendar document for a user.
    ///
    /// Every configured source contributes its last successfully synced
    /// events, disabled and needs-reauth sources included, until the
    /// source is removed: stale-but-available beats empty. Masking is
    /// applied per source. A user with no synced events gets an empty but
    /// valid calendar, never an error.
    pub fn generate(&self, user: UserId) -> String {
        let sources = self.registry.user_sources(user);

        let mut entries: Vec<Event> = Vec::new();
        for source in &sources {
            for event in self.store.events_for(source.id) {
                entries.push(apply_masking(&event, source.masking));
            }
        }
        entries.sort_by_key(|e| e.sort_key());

        debug!(user_id = %user, events = entries.len(), "generating feed");

        let mut calendar = Calendar::new();
        for event in &entries {
            calendar.push(vevent_for(event));
        }
        finalize(calendar.done().to_string())
    }

    /// Generates the feed for the user a token resolves to, or `None` when
    /// the token is unknown (or was rotated away).
    pub fn generate_for_token(&self, token: &str) -> Option<String> {
        let user = self.tokens.resolve(token)?;
        Some(self.generate(user))
    }

    /// Stable digest of a serialized feed, usable as an ETag by the
    /// serving layer.
    pub fn feed_digest(feed: &str) -> String {
        let digest = Sha256::digest(feed.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn vevent_for(event: &Event) -> icalendar::Event {
    let mut vevent = icalendar::Event::new();
    vevent.uid(&format!("{}@unifeed", event.occurrence));
    vevent.summary(&event.title);

    // DTSTAMP must not depend on when the feed is generated, or unchanged
    // input would produce spurious diffs.
    let dtstamp = event
        .last_modified
        .unwrap_or_else(|| event.start.to_utc_datetime())
        .format("%Y%m%dT%H%M%SZ")
        .to_string();
    vevent.add_property("DTSTAMP", &dtstamp);

    match (&event.start, &event.end) {
        (EventTime::AllDay(start), EventTime::AllDay(end)) => {
            vevent.starts(DatePerhapsTime::Date(*start));
            vevent.ends(DatePerhapsTime::Date(*end));
        }
        _ => {
            vevent.starts(event.start.to_utc_datetime());
            vevent.ends(event.end.to_utc_datetime());
        }
    }

    if let Some(ref description) = event.description {
        vevent.description(description);
    }
    if let Some(ref location) = event.location {
        vevent.location(location);
    }

    // Masked or not, aggregated events block the time slot.
    vevent.add_property("TRANSP", "OPAQUE");

    vevent.done()
}

/// Normalizes the calendar envelope: our PRODID, and the publish metadata
/// right after the opening line.
fn finalize(ics: String) -> String {
    let mut out = String::with_capacity(ics.len() + 64);
    for line in ics.lines() {
        if line.starts_with("PRODID") {
            out.push_str("PRODID:-//unifeed//EN\r\n");
            continue;
        }
        out.push_str(line);
        out.push_str("\r\n");
        if line == "BEGIN:VCALENDAR" {
            out.push_str("METHOD:PUBLISH\r\n");
            out.push_str("X-WR-CALNAME:Unified Calendar\r\n");
        }
    }
    out
}
