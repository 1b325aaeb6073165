//! Background scheduler.
//!
//! An explicit periodic task plus an on-demand command channel, both
//! feeding the orchestrator's single-flight-guarded entry point. Each tick
//! re-scans the source registry for due sources; there is no in-memory
//! "due" registry to drift or to lose on restart. Attempts run on a
//! bounded worker pool; per-source mutual exclusion lives in the
//! orchestrator, so an over-eager scan at worst produces coalesced skips.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info};

use unifeed_core::{SourceId, UserId};

use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{Orchestrator, SyncTrigger};
use crate::registry::SourceRegistry;

/// What a manual trigger covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// One source.
    Source(SourceId),
    /// Every enabled source of one user.
    User(UserId),
    /// Every enabled source.
    All,
}

/// Commands accepted by the running scheduler.
#[derive(Debug, Clone, Copy)]
enum SchedulerCommand {
    Sync(SyncScope),
    Stop,
}

/// Acknowledgement of a manual trigger: the attempt was started or
/// coalesced into one already in flight. Says nothing about the eventual
/// outcome; that lands in the source status and the run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    /// The request was handed to the orchestrator.
    Accepted,
}

/// The background scheduler.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<SourceRegistry>,
    workers: Arc<Semaphore>,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
}

impl Scheduler {
    /// Creates a scheduler over the orchestrator and its registry.
    pub fn new(orchestrator: Arc<Orchestrator>, registry: Arc<SourceRegistry>) -> Self {
        let workers = Arc::new(Semaphore::new(orchestrator.config().max_concurrent_syncs));
        let (command_tx, command_rx) = mpsc::channel(32);
        Self {
            orchestrator,
            registry,
            workers,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Returns a handle for sending commands to the running scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Runs the scheduler loop until stopped.
    pub async fn run(mut self) {
        let mut command_rx = self.command_rx.take().expect("run called twice");
        let tick = self.orchestrator.config().scheduler_tick;

        info!(tick_secs = tick.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    self.scan();
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Sync(scope)) => self.trigger(scope),
                        Some(SchedulerCommand::Stop) | None => {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One scan pass: spawn a scheduled attempt for every due source.
    fn scan(&self) {
        let now = Utc::now();
        for source in self.registry.list() {
            if self.orchestrator.scheduled_due(&source, now) {
                debug!(source_id = %source.id, "source due for sync");
                self.spawn_sync(source.id, SyncTrigger::Scheduled);
            }
        }
    }

    /// Spawns immediate manual attempts for a scope.
    fn trigger(&self, scope: SyncScope) {
        let ids: Vec<SourceId> = match scope {
            SyncScope::Source(id) => vec![id],
            SyncScope::User(user) => self
                .registry
                .user_sources(user)
                .into_iter()
                .filter(|s| s.enabled)
                .map(|s| s.id)
                .collect(),
            SyncScope::All => self
                .registry
                .list()
                .into_iter()
                .filter(|s| s.enabled)
                .map(|s| s.id)
                .collect(),
        };

        debug!(count = ids.len(), scope = ?scope, "manual sync triggered");
        for id in ids {
            self.spawn_sync(id, SyncTrigger::Manual);
        }
    }

    fn spawn_sync(&self, id: SourceId, trigger: SyncTrigger) {
        let orchestrator = self.orchestrator.clone();
        let workers = self.workers.clone();
        tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            orchestrator.sync_source(id, trigger).await;
        });
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Requests an immediate sync of one source.
    pub async fn sync_source(&self, id: SourceId) -> EngineResult<TriggerAck> {
        self.send(SchedulerCommand::Sync(SyncScope::Source(id))).await
    }

    /// Requests an immediate sync of every enabled source of a user.
    pub async fn sync_user(&self, user: UserId) -> EngineResult<TriggerAck> {
        self.send(SchedulerCommand::Sync(SyncScope::User(user))).await
    }

    /// Requests an immediate sync of every enabled source.
    pub async fn sync_all(&self) -> EngineResult<TriggerAck> {
        self.send(SchedulerCommand::Sync(SyncScope::All)).await
    }

    /// Stops the scheduler loop.
    pub async fn stop(&self) -> EngineResult<()> {
        self.command_tx
            .send(SchedulerCommand::Stop)
            .await
            .map_err(|_| EngineError::SchedulerStopped)?;
        Ok(())
    }

    async fn send(&self, command: SchedulerCommand) -> EngineResult<TriggerAck> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::SchedulerStopped)?;
        Ok(TriggerAck::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::orchestrator::test_support::*;
    use std::time::Duration;
    use unifeed_core::SyncStatus;

    fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .with_scheduler_tick(Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_secs(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scan_syncs_due_sources() {
        let adapter = ScriptedAdapter::new(unifeed_core::SourceKind::Ics, |_| {
            Ok(vec![raw_event("a", 9, "A")])
        });
        let (adapters, ics) = ics_adapter_set(adapter);
        let (orchestrator, registry, store) = build_orchestrator(adapters, fast_config());
        registry.insert(ics_source(1, 1));

        let scheduler = Scheduler::new(orchestrator, registry.clone());
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(ics.call_count() >= 1);
        assert_eq!(store.event_count(unifeed_core::SourceId(1)), 1);
        assert_eq!(
            registry.get(unifeed_core::SourceId(1)).unwrap().status,
            SyncStatus::Success
        );

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn needs_reauth_is_never_scheduled_but_manual_reattempts() {
        let adapter = ScriptedAdapter::new(unifeed_core::SourceKind::Ics, |_| {
            Err(unifeed_providers::AdapterError::auth_expired("expired"))
        });
        let (adapters, ics) = ics_adapter_set(adapter);
        let (orchestrator, registry, _) = build_orchestrator(adapters, fast_config());

        let mut source = ics_source(1, 1);
        source.status = SyncStatus::NeedsReauth;
        registry.insert(source);

        let scheduler = Scheduler::new(orchestrator, registry.clone());
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        // Many ticks pass; the scheduler must not touch the source.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ics.call_count(), 0);

        // A manual trigger does re-attempt it.
        assert_eq!(
            handle.sync_source(unifeed_core::SourceId(1)).await.unwrap(),
            TriggerAck::Accepted
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ics.call_count(), 1);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn manual_triggers_are_accepted_and_coalesced() {
        let adapter = ScriptedAdapter::new(unifeed_core::SourceKind::Ics, |_| Ok(Vec::new()))
            .with_delay(Duration::from_millis(150));
        let (adapters, ics) = ics_adapter_set(adapter);
        let (orchestrator, registry, _) = build_orchestrator(adapters, fast_config());
        registry.insert(ics_source(1, 1));

        let scheduler = Scheduler::new(orchestrator, registry.clone());
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        // Both triggers are acknowledged immediately; the second lands
        // while the first attempt is in flight and coalesces into it.
        assert_eq!(
            handle.sync_source(unifeed_core::SourceId(1)).await.unwrap(),
            TriggerAck::Accepted
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            handle.sync_source(unifeed_core::SourceId(1)).await.unwrap(),
            TriggerAck::Accepted
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ics.call_count(), 1);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sync_user_covers_only_that_users_enabled_sources() {
        let adapter = ScriptedAdapter::new(unifeed_core::SourceKind::Ics, |_| Ok(Vec::new()));
        let (adapters, ics) = ics_adapter_set(adapter);
        // Tick far beyond the test duration: only manual triggers run.
        let config = fast_config().with_scheduler_tick(Duration::from_secs(3600));
        let (orchestrator, registry, _) = build_orchestrator(adapters, config);

        registry.insert(ics_source(1, 1));
        registry.insert(ics_source(2, 1).with_enabled(false));
        registry.insert(ics_source(3, 2));

        let scheduler = Scheduler::new(orchestrator, registry.clone());
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        handle.sync_user(unifeed_core::UserId(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only user 1's enabled source was attempted.
        assert_eq!(ics.call_count(), 1);
        assert_eq!(
            registry.get(unifeed_core::SourceId(1)).unwrap().status,
            SyncStatus::Success
        );
        assert_eq!(
            registry.get(unifeed_core::SourceId(3)).unwrap().status,
            SyncStatus::Pending
        );

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_errors_after_stop() {
        let adapter = ScriptedAdapter::new(unifeed_core::SourceKind::Ics, |_| Ok(Vec::new()));
        let (adapters, _) = ics_adapter_set(adapter);
        let (orchestrator, registry, _) = build_orchestrator(adapters, fast_config());

        let scheduler = Scheduler::new(orchestrator, registry);
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        handle.stop().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.sync_all().await,
            Err(EngineError::SchedulerStopped)
        ));
    }
}
