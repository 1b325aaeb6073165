//! The sync orchestrator.
//!
//! Drives the per-source lifecycle `idle → syncing → {success, failed,
//! needs-reauth}`:
//!
//! - one attempt in flight per source; concurrent triggers coalesce into
//!   the in-flight attempt instead of queuing,
//! - every attempt resolves to a state-machine outcome; adapter and
//!   credential errors never escape,
//! - a successful attempt commits atomically through the store's set swap;
//!   any failure, a timeout included, leaves the previous event set
//!   fully intact,
//! - retryable failures defer the next scheduled attempt by exponential
//!   backoff; auth failures park the source in needs-reauth until the user
//!   acts. A manual trigger bypasses backoff and re-attempts needs-reauth
//!   sources, so a user who re-authorized out of band can self-heal.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use unifeed_core::{CalendarSource, SourceId, SyncStatus};
use unifeed_providers::{
    AdapterError, AdapterErrorKind, AdapterResult, AdapterSet, CredentialProvider,
    normalize_events,
};

use crate::config::EngineConfig;
use crate::registry::SourceRegistry;
use crate::store::{CommitOutcome, UnifiedStore};

/// What initiated a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// The periodic scheduler.
    Scheduled,
    /// A user-initiated "sync now".
    Manual,
}

/// How one orchestration attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Fetch, normalize and commit succeeded.
    Success,
    /// Retryable failure; the source becomes eligible again after backoff.
    Failed,
    /// Credentials are dead; the source waits for the user.
    NeedsReauth,
    /// No attempt was made (disabled, coalesced, in backoff, ...).
    Skipped,
}

/// Ephemeral record of one orchestration attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    /// The source attempted.
    pub source: SourceId,
    /// What initiated the attempt.
    pub trigger: SyncTrigger,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// How the attempt resolved.
    pub outcome: RunOutcome,
    /// Error detail, or the skip reason for `Skipped`.
    pub detail: Option<String>,
    /// The commit delta of a successful attempt.
    pub delta: Option<CommitOutcome>,
    /// `true` when a successful attempt changed nothing.
    pub noop: bool,
}

/// Removes the source from the in-flight set on every exit path.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<SourceId>>,
    id: SourceId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<SourceId>>, id: SourceId) -> Option<Self> {
        if set.lock().expect("in-flight lock poisoned").insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.id);
    }
}

/// The sync orchestrator.
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    store: Arc<UnifiedStore>,
    credentials: Arc<CredentialProvider>,
    adapters: Arc<AdapterSet>,
    config: EngineConfig,
    in_flight: Mutex<HashSet<SourceId>>,
    runs: Mutex<VecDeque<SyncRun>>,
}

impl Orchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<UnifiedStore>,
        credentials: Arc<CredentialProvider>,
        adapters: Arc<AdapterSet>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            credentials,
            adapters,
            config,
            in_flight: Mutex::new(HashSet::new()),
            runs: Mutex::new(VecDeque::new()),
        }
    }

    /// The engine configuration this orchestrator runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` if the scheduler should attempt this source now.
    ///
    /// A source is due when it is enabled, idle, its last failure is
    /// retryable, and the elapsed time since the last attempt satisfies the
    /// interval (healthy sources) or the backoff delay (failing ones).
    /// Needs-reauth sources are never due: only an explicit reauthorization
    /// or a manual trigger touches them again.
    pub fn scheduled_due(&self, source: &CalendarSource, now: DateTime<Utc>) -> bool {
        if !source.enabled || !source.status.is_idle() {
            return false;
        }
        if source.status == SyncStatus::Failed
            && source.last_error_kind.as_deref()
                == Some(AdapterErrorKind::ConfigInvalid.as_str())
        {
            return false;
        }

        let required = match source.status {
            SyncStatus::Failed => self.config.backoff.delay(source.consecutive_failures),
            _ => self.config.sync_interval,
        };
        match source.last_attempt_at {
            None => true,
            Some(at) => {
                let required = chrono::Duration::from_std(required)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                now - at >= required
            }
        }
    }

    /// Runs one sync attempt for a source and returns its record.
    ///
    /// Never returns an error: every failure mode resolves to a
    /// [`RunOutcome`]. Scheduled triggers respect backoff and terminal
    /// states; manual triggers bypass both, but both respect the per-source
    /// mutual exclusion.
    pub async fn sync_source(&self, id: SourceId, trigger: SyncTrigger) -> SyncRun {
        let started_at = Utc::now();

        let Some(source) = self.registry.get(id) else {
            return self.skipped(id, trigger, started_at, "unknown source");
        };
        if !source.enabled {
            return self.skipped(id, trigger, started_at, "source is disabled");
        }
        if trigger == SyncTrigger::Scheduled {
            if source.status == SyncStatus::NeedsReauth {
                return self.skipped(id, trigger, started_at, "source needs reauthorization");
            }
            if !self.scheduled_due(&source, started_at) {
                return self.skipped(id, trigger, started_at, "not due yet");
            }
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            return self.skipped(id, trigger, started_at, "coalesced into in-flight attempt");
        };

        if self.registry.mark_syncing(id, started_at).is_err() {
            return self.skipped(id, trigger, started_at, "source removed");
        }
        debug!(source_id = %id, trigger = ?trigger, "sync attempt started");

        let result = match tokio::time::timeout(self.config.attempt_timeout, self.attempt(&source))
            .await
        {
            Ok(result) => result,
            // Partial adapter output is still owned by the aborted future
            // and never reaches the store.
            Err(_) => Err(AdapterError::transient_network(
                "sync attempt exceeded the maximum duration",
            )),
        };

        let finished_at = Utc::now();
        let run = match result {
            Ok(events) => {
                let delta = self.store.commit(id, events);
                self.registry.record_success(id, finished_at);
                info!(
                    source_id = %id,
                    added = delta.added,
                    updated = delta.updated,
                    removed = delta.removed,
                    "sync succeeded"
                );
                SyncRun {
                    source: id,
                    trigger,
                    started_at,
                    finished_at,
                    outcome: RunOutcome::Success,
                    detail: None,
                    noop: delta.is_noop(),
                    delta: Some(delta),
                }
            }
            Err(e) if e.needs_reauth() => {
                warn!(source_id = %id, error = %e, "sync requires reauthorization");
                self.registry
                    .record_needs_reauth(id, e.to_string(), e.kind().as_str());
                SyncRun {
                    source: id,
                    trigger,
                    started_at,
                    finished_at,
                    outcome: RunOutcome::NeedsReauth,
                    detail: Some(e.to_string()),
                    delta: None,
                    noop: false,
                }
            }
            Err(e) => {
                warn!(source_id = %id, error = %e, kind = %e.kind(), "sync failed");
                self.registry.record_failure(id, e.to_string(), e.kind().as_str());
                SyncRun {
                    source: id,
                    trigger,
                    started_at,
                    finished_at,
                    outcome: RunOutcome::Failed,
                    detail: Some(e.to_string()),
                    delta: None,
                    noop: false,
                }
            }
        };

        self.push_run(run.clone());
        run
    }

    /// Marks a source re-authorized: clears needs-reauth so scheduling
    /// resumes. Installing the fresh grant is the credential provider's
    /// side of the same action (see `Engine::reauthorize`).
    pub fn reauthorize(&self, id: SourceId) -> crate::error::EngineResult<()> {
        self.registry.clear_reauth(id)
    }

    /// Recent sync runs, oldest first.
    pub fn recent_runs(&self) -> Vec<SyncRun> {
        self.runs
            .lock()
            .expect("runs lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    async fn attempt(&self, source: &CalendarSource) -> AdapterResult<Vec<unifeed_core::Event>> {
        let credentials = self.credentials.resolve(source).await?;
        let adapter = self.adapters.for_kind(source.kind());
        let window = self.config.fetch_window(Utc::now());
        let raw = adapter
            .fetch_events(source.clone(), credentials, window)
            .await?;
        Ok(normalize_events(source.id, &raw))
    }

    fn skipped(
        &self,
        id: SourceId,
        trigger: SyncTrigger,
        at: DateTime<Utc>,
        reason: &str,
    ) -> SyncRun {
        debug!(source_id = %id, reason, "sync skipped");
        SyncRun {
            source: id,
            trigger,
            started_at: at,
            finished_at: at,
            outcome: RunOutcome::Skipped,
            detail: Some(reason.to_string()),
            delta: None,
            noop: false,
        }
    }

    fn push_run(&self, run: SyncRun) {
        let mut runs = self.runs.lock().expect("runs lock poisoned");
        runs.push_back(run);
        while runs.len() > self.config.run_history {
            runs.pop_front();
        }
    }
}
