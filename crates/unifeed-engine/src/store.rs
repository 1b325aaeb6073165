//! The unified event store.
//!
//! Holds the latest successfully-synced event set per source, keyed by
//! occurrence identity. Only the orchestrator's commit step mutates it,
//! and always under the per-source single-flight guard; everything else
//! (feed generator, status displays) is a read-only observer.
//!
//! A commit replaces a source's whole set in one map swap under the write
//! lock, so a concurrent reader sees either the fully-old or the fully-new
//! set, never an interleaving. A failed sync never reaches commit at all,
//! leaving the previous set untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use tracing::debug;

use unifeed_core::{Event, OccurrenceId, SourceId};

/// The delta one commit applied, for observability and no-op detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CommitOutcome {
    /// Occurrences that did not exist before.
    pub added: usize,
    /// Occurrences whose content changed.
    pub updated: usize,
    /// Stored occurrences absent from the new set.
    pub removed: usize,
}

impl CommitOutcome {
    /// Returns `true` if the commit changed nothing.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// In-memory unified store of synced events.
#[derive(Debug, Default)]
pub struct UnifiedStore {
    inner: RwLock<HashMap<SourceId, BTreeMap<OccurrenceId, Event>>>,
}

impl UnifiedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a source's event set with `events`.
    ///
    /// Computes the symmetric difference against the stored set: new
    /// occurrences are inserts, missing ones are deletes, and occurrences
    /// present on both sides count as updates only when their content
    /// differs. Re-committing an identical set is a recorded no-op.
    pub fn commit(&self, source: SourceId, events: Vec<Event>) -> CommitOutcome {
        let mut incoming: BTreeMap<OccurrenceId, Event> = BTreeMap::new();
        for event in events {
            incoming.insert(event.occurrence.clone(), event);
        }

        let mut stores = self.inner.write().expect("store lock poisoned");
        let current = stores.entry(source).or_default();

        let mut outcome = CommitOutcome::default();
        for (occurrence, event) in &incoming {
            match current.get(occurrence) {
                None => outcome.added += 1,
                Some(existing) if existing != event => outcome.updated += 1,
                Some(_) => {}
            }
        }
        outcome.removed = current
            .keys()
            .filter(|occurrence| !incoming.contains_key(*occurrence))
            .count();

        *current = incoming;

        debug!(
            source_id = %source,
            added = outcome.added,
            updated = outcome.updated,
            removed = outcome.removed,
            "committed event set"
        );
        outcome
    }

    /// The stored events of one source, in occurrence-identity order.
    pub fn events_for(&self, source: SourceId) -> Vec<Event> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .get(&source)
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored events for one source.
    pub fn event_count(&self, source: SourceId) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .get(&source)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Drops all events of a source (on source removal).
    pub fn remove_source(&self, source: SourceId) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .remove(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use unifeed_core::EventTime;

    fn event(source: u64, uid: &str, hour: u32, title: &str) -> Event {
        Event::new(
            SourceId(source),
            OccurrenceId::single(uid),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, hour, 0, 0).unwrap()),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, hour + 1, 0, 0).unwrap()),
            title,
        )
    }

    #[test]
    fn first_commit_adds_everything() {
        let store = UnifiedStore::new();
        let outcome = store.commit(
            SourceId(1),
            vec![event(1, "a", 9, "A"), event(1, "b", 10, "B")],
        );

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.removed, 0);
        assert_eq!(store.event_count(SourceId(1)), 2);
    }

    #[test]
    fn identical_recommit_is_noop() {
        let store = UnifiedStore::new();
        let events = vec![event(1, "a", 9, "A"), event(1, "b", 10, "B")];

        store.commit(SourceId(1), events.clone());
        let before = store.events_for(SourceId(1));

        let outcome = store.commit(SourceId(1), events);
        assert!(outcome.is_noop());
        assert_eq!(store.events_for(SourceId(1)), before);
    }

    #[test]
    fn diff_counts_adds_updates_removes() {
        let store = UnifiedStore::new();
        store.commit(
            SourceId(1),
            vec![event(1, "keep", 9, "Keep"), event(1, "gone", 10, "Gone")],
        );

        let outcome = store.commit(
            SourceId(1),
            vec![event(1, "keep", 9, "Keep renamed"), event(1, "new", 11, "New")],
        );

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.removed, 1);

        let stored = store.events_for(SourceId(1));
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|e| e.title == "Keep renamed"));
        assert!(!stored.iter().any(|e| e.title == "Gone"));
    }

    #[test]
    fn sources_are_isolated() {
        let store = UnifiedStore::new();
        store.commit(SourceId(1), vec![event(1, "a", 9, "A")]);
        store.commit(SourceId(2), vec![event(2, "b", 10, "B")]);

        store.commit(SourceId(1), Vec::new());
        assert_eq!(store.event_count(SourceId(1)), 0);
        assert_eq!(store.event_count(SourceId(2)), 1);
    }

    #[test]
    fn remove_source_drops_events() {
        let store = UnifiedStore::new();
        store.commit(SourceId(1), vec![event(1, "a", 9, "A")]);
        store.remove_source(SourceId(1));
        assert!(store.events_for(SourceId(1)).is_empty());
    }

    #[test]
    fn upsert_is_keyed_by_occurrence_identity() {
        let store = UnifiedStore::new();
        let mut instance = event(1, "series", 9, "Standup");
        instance.occurrence = OccurrenceId::instance("series", "20250205T090000Z");
        let mut other = event(1, "series", 10, "Standup");
        other.occurrence = OccurrenceId::instance("series", "20250212T090000Z");

        store.commit(SourceId(1), vec![instance.clone(), other]);
        assert_eq!(store.event_count(SourceId(1)), 2);

        // Re-upserting one instance overwrites exactly that instance.
        let mut renamed = instance;
        renamed.title = "Standup (moved)".into();
        let outcome = store.commit(
            SourceId(1),
            vec![
                renamed.clone(),
                store
                    .events_for(SourceId(1))
                    .into_iter()
                    .find(|e| e.occurrence != renamed.occurrence)
                    .unwrap(),
            ],
        );
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.removed, 0);
    }
}
