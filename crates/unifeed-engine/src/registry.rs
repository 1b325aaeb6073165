//! Registry of configured calendar sources.
//!
//! The registry is the single authority on source records. Configuration
//! fields change through [`SourceRegistry::insert`] and
//! [`SourceRegistry::update_config`] (user actions); the sync status,
//! timestamp and error fields change only through the `record_*` methods
//! the orchestrator calls. The scheduler re-scans the registry each tick,
//! so there is no separate in-memory "due" state to lose on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::info;

use unifeed_core::{CalendarSource, SourceId, SyncStatus, UserId};

use crate::error::{EngineError, EngineResult};

/// In-memory registry of calendar sources.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<SourceId, CalendarSource>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source, replacing any previous record with the same id.
    pub fn insert(&self, source: CalendarSource) {
        info!(source_id = %source.id, kind = %source.kind(), "registering source");
        self.write().insert(source.id, source);
    }

    /// Removes a source record. Returns the removed record, if any.
    pub fn remove(&self, id: SourceId) -> Option<CalendarSource> {
        let removed = self.write().remove(&id);
        if removed.is_some() {
            info!(source_id = %id, "removed source");
        }
        removed
    }

    /// Looks up one source.
    pub fn get(&self, id: SourceId) -> Option<CalendarSource> {
        self.read().get(&id).cloned()
    }

    /// All sources, ordered by id.
    pub fn list(&self) -> Vec<CalendarSource> {
        let mut sources: Vec<_> = self.read().values().cloned().collect();
        sources.sort_by_key(|s| s.id);
        sources
    }

    /// All sources of one user, ordered by id.
    pub fn user_sources(&self, user: UserId) -> Vec<CalendarSource> {
        let mut sources: Vec<_> = self
            .read()
            .values()
            .filter(|s| s.user == user)
            .cloned()
            .collect();
        sources.sort_by_key(|s| s.id);
        sources
    }

    /// Applies a user-level configuration change.
    ///
    /// Editing configuration resets the sync state to `Pending` and clears
    /// the recorded error, so a fixed configuration becomes eligible for
    /// scheduling again without waiting out an old failure.
    pub fn update_config(
        &self,
        id: SourceId,
        mutate: impl FnOnce(&mut CalendarSource),
    ) -> EngineResult<()> {
        let mut sources = self.write();
        let source = sources.get_mut(&id).ok_or(EngineError::UnknownSource(id))?;
        mutate(source);
        if source.status != SyncStatus::Syncing {
            source.status = SyncStatus::Pending;
        }
        source.last_error = None;
        source.last_error_kind = None;
        source.consecutive_failures = 0;
        Ok(())
    }

    // Orchestrator-owned transitions below.

    pub(crate) fn mark_syncing(&self, id: SourceId, at: DateTime<Utc>) -> EngineResult<()> {
        let mut sources = self.write();
        let source = sources.get_mut(&id).ok_or(EngineError::UnknownSource(id))?;
        source.status = SyncStatus::Syncing;
        source.last_attempt_at = Some(at);
        Ok(())
    }

    pub(crate) fn record_success(&self, id: SourceId, at: DateTime<Utc>) {
        if let Some(source) = self.write().get_mut(&id) {
            source.status = SyncStatus::Success;
            source.last_sync_at = Some(at);
            source.last_error = None;
            source.last_error_kind = None;
            source.consecutive_failures = 0;
        }
    }

    pub(crate) fn record_failure(&self, id: SourceId, error: String, kind: &str) {
        if let Some(source) = self.write().get_mut(&id) {
            source.status = SyncStatus::Failed;
            source.last_error = Some(error);
            source.last_error_kind = Some(kind.to_string());
            source.consecutive_failures = source.consecutive_failures.saturating_add(1);
        }
    }

    pub(crate) fn record_needs_reauth(&self, id: SourceId, error: String, kind: &str) {
        if let Some(source) = self.write().get_mut(&id) {
            source.status = SyncStatus::NeedsReauth;
            source.last_error = Some(error);
            source.last_error_kind = Some(kind.to_string());
        }
    }

    /// Clears a needs-reauth state after the user re-authorized.
    pub fn clear_reauth(&self, id: SourceId) -> EngineResult<()> {
        let mut sources = self.write();
        let source = sources.get_mut(&id).ok_or(EngineError::UnknownSource(id))?;
        if source.status == SyncStatus::NeedsReauth {
            source.status = SyncStatus::Pending;
            source.last_error = None;
            source.last_error_kind = None;
            source.consecutive_failures = 0;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SourceId, CalendarSource>> {
        self.inner.read().expect("registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceId, CalendarSource>> {
        self.inner.write().expect("registry lock poisoned")
    }
}
