use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::{
        connection_table::ConnectionTable,
        event_outbox::EventOutbox,
        store::{SharedStore, StoreHandle},
    },
    engine::{FenRelay, RuleEngine},
    services::{broadcaster::Broadcaster, registry::StreamRegistry, rewards::{LogRewardSink, RewardSink}},
};

/// Cheaply cloneable handle to the application state.
pub type SharedState = Arc<AppState>;

/// Central application state wiring the durable tables, the local stream
/// registry, and the broadcaster together.
///
/// Constructed exactly once at process start and injected into every handler;
/// nothing here is reachable through a global.
pub struct AppState {
    config: AppConfig,
    store: StoreHandle,
    connections: ConnectionTable,
    outbox: EventOutbox,
    registry: StreamRegistry,
    broadcaster: Broadcaster,
    engine: Arc<dyn RuleEngine>,
    rewards: Arc<dyn RewardSink>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Build the state with the default collaborators.
    ///
    /// The application starts in degraded mode until a storage backend is
    /// installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_collaborators(config, Arc::new(FenRelay), Arc::new(LogRewardSink))
    }

    /// Build the state with explicit rule-engine and reward collaborators.
    pub fn with_collaborators(
        config: AppConfig,
        engine: Arc<dyn RuleEngine>,
        rewards: Arc<dyn RewardSink>,
    ) -> SharedState {
        let store = StoreHandle::new();
        let connections = ConnectionTable::new(store.clone());
        let outbox = EventOutbox::new(store.clone());
        let registry = StreamRegistry::new();
        let broadcaster =
            Broadcaster::new(registry.clone(), outbox.clone(), config.event_ttl_ms());
        let (degraded_tx, _rx) = watch::channel(true);

        Arc::new(Self {
            config,
            store,
            connections,
            outbox,
            registry,
            broadcaster,
            engine,
            rewards,
            degraded: degraded_tx,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle to the currently installed store backend.
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// The shared connection table.
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// The shared event outbox.
    pub fn outbox(&self) -> &EventOutbox {
        &self.outbox
    }

    /// Registry of live streams owned by this process.
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// The event fan-out entry point.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// The move-validation collaborator.
    pub fn engine(&self) -> &Arc<dyn RuleEngine> {
        &self.engine
    }

    /// The reward settlement collaborator.
    pub fn rewards(&self) -> &Arc<dyn RewardSink> {
        &self.rewards
    }

    /// Install a store backend and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn SharedStore>) {
        self.store.install(store).await;
        let _ = self.degraded.send(false);
    }

    /// Remove the store backend and enter degraded mode.
    pub async fn clear_store(&self) {
        self.store.clear().await;
        let _ = self.degraded.send(true);
    }

    /// Whether the application currently runs without a storage backend.
    pub async fn is_degraded(&self) -> bool {
        !self.store.is_installed().await
    }

    /// Subscribe to degraded mode transitions.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }
}
