//! Sync orchestration and feed generation.
//!
//! This crate wires the source adapters into a running aggregation engine:
//!
//! - [`SourceRegistry`] - the authority on configured sources and their
//!   sync status
//! - [`UnifiedStore`] - last successfully-synced events per source
//! - [`Orchestrator`] - the per-source sync state machine
//! - [`Scheduler`] - periodic scans plus on-demand triggers over a bounded
//!   worker pool
//! - [`FeedGenerator`] - deterministic iCalendar output per user
//! - [`FeedTokenRegistry`] - opaque feed access tokens
//!
//! [`Engine`] assembles the pieces for embedding by a serving layer.

pub mod config;
pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod tokens;

pub use config::{BackoffPolicy, EngineConfig, MAX_SYNC_INTERVAL, MIN_SYNC_INTERVAL};
pub use error::{EngineError, EngineResult};
pub use feed::FeedGenerator;
pub use orchestrator::{Orchestrator, RunOutcome, SyncRun, SyncTrigger};
pub use registry::SourceRegistry;
pub use scheduler::{Scheduler, SchedulerHandle, SyncScope, TriggerAck};
pub use store::{CommitOutcome, UnifiedStore};
pub use tokens::FeedTokenRegistry;

use std::sync::Arc;

use unifeed_core::{CalendarSource, FeedToken, SourceId, UserId};
use unifeed_providers::{AdapterSet, CredentialProvider, OauthGrant, TokenRefresher};

/// The assembled aggregation engine.
///
/// Owns the registry, store, credential provider, orchestrator, token
/// registry and feed generator, and hands out [`Scheduler`]s to run. The
/// serving layer embeds one `Engine` and exposes feed retrieval and the
/// configuration surface on top of it.
pub struct Engine {
    registry: Arc<SourceRegistry>,
    store: Arc<UnifiedStore>,
    credentials: Arc<CredentialProvider>,
    orchestrator: Arc<Orchestrator>,
    tokens: Arc<FeedTokenRegistry>,
    feed: FeedGenerator,
}

impl Engine {
    /// Assembles an engine from its configuration, the adapter set and the
    /// OAuth token refresher.
    pub fn new(
        config: EngineConfig,
        adapters: AdapterSet,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let registry = Arc::new(SourceRegistry::new());
        let store = Arc::new(UnifiedStore::new());
        let credentials = Arc::new(CredentialProvider::new(refresher));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            store.clone(),
            credentials.clone(),
            Arc::new(adapters),
            config,
        ));
        let tokens = Arc::new(FeedTokenRegistry::new());
        let feed = FeedGenerator::new(registry.clone(), store.clone(), tokens.clone());

        Self {
            registry,
            store,
            credentials,
            orchestrator,
            tokens,
            feed,
        }
    }

    /// The source registry.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// The unified event store.
    pub fn store(&self) -> &Arc<UnifiedStore> {
        &self.store
    }

    /// The credential provider (secrets are installed here).
    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    /// The sync orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The feed token registry.
    pub fn tokens(&self) -> &Arc<FeedTokenRegistry> {
        &self.tokens
    }

    /// The feed generator.
    pub fn feed(&self) -> &FeedGenerator {
        &self.feed
    }

    /// Builds a scheduler for this engine. Run it with
    /// [`Scheduler::run`]; use its handle for manual triggers.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.orchestrator.clone(), self.registry.clone())
    }

    /// Registers a user and returns their feed token.
    pub fn register_user(&self, user: UserId) -> FeedToken {
        self.tokens.issue(user)
    }

    /// Adds (or replaces) a calendar source.
    pub fn add_source(&self, source: CalendarSource) {
        self.registry.insert(source);
    }

    /// Removes a source together with its events and secrets.
    ///
    /// The registry entry goes first: once it is gone, feed generation can
    /// no longer reach the source's events, so the subsequent store drop
    /// is invisible to readers.
    pub fn remove_source(&self, id: SourceId) {
        self.registry.remove(id);
        self.store.remove_source(id);
        self.credentials.remove(id);
    }

    /// Completes an out-of-band reauthorization: installs the fresh grant
    /// and lifts the source out of needs-reauth so scheduling resumes.
    pub fn reauthorize(&self, id: SourceId, grant: OauthGrant) -> EngineResult<()> {
        self.credentials.reauthorize(id, grant);
        self.orchestrator.reauthorize(id)
    }

    /// Serves the feed for a presented token, or `None` if the token does
    /// not resolve.
    pub fn feed_for_token(&self, token: &str) -> Option<String> {
        self.feed.generate_for_token(token)
    }
}
