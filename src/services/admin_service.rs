use indexmap::IndexMap;
use tracing::info;

use crate::dao::models::now_ms;
use crate::dao::storage::StorageError;
use crate::dto::admin::{
    CleanupResponse, ClearResponse, ConnectionSummary, DiagnosticsResponse, OutboxEntryReport,
};
use crate::error::ServiceError;
use crate::services::events;
use crate::state::SharedState;

/// Aggregate view of both shared tables.
///
/// Listing the connection table already evicts stale and corrupt rows, so
/// reading diagnostics doubles as an opportunistic GC pass. With storage
/// down, the report falls back to what this process can see locally.
pub async fn diagnostics(state: &SharedState) -> Result<DiagnosticsResponse, ServiceError> {
    let now = now_ms();
    let ttl = state.config().connection_ttl_ms();
    let local_connections = state.registry().count_for(None);

    let (active, outbox) = match state.connections().list_active(now, ttl).await {
        Ok(active) => {
            let outbox = state.outbox().peek(now).await.unwrap_or_default();
            (active, outbox)
        }
        Err(StorageError::Degraded) => (Vec::new(), Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut viewers_per_scope: IndexMap<String, usize> = IndexMap::new();
    for record in &active {
        for scope in &record.subscriptions {
            *viewers_per_scope.entry(scope.clone()).or_default() += 1;
        }
    }

    Ok(DiagnosticsResponse {
        degraded: state.is_degraded().await,
        total_connections: active.len(),
        local_connections,
        viewers_per_scope,
        connections: active.into_iter().map(ConnectionSummary::from).collect(),
        outbox: outbox.into_iter().map(OutboxEntryReport::from).collect(),
    })
}

/// Explicit garbage-collection pass over both tables.
///
/// Evicts heartbeat-expired and corrupt connections, drops expired and
/// corrupt events, and leaves pending valid envelopes for their consumers.
/// Corruption is tolerated and counted, never an error.
pub async fn cleanup(state: &SharedState) -> Result<CleanupResponse, ServiceError> {
    let now = now_ms();
    let ttl = state.config().connection_ttl_ms();

    let connection_sweep = state.connections().sweep(now, ttl).await?;
    let event_sweep = state.outbox().sweep(now).await?;

    let report = CleanupResponse::from_sweeps(connection_sweep, event_sweep);
    info!(
        stale = report.connections_evicted_stale,
        corrupt_connections = report.connections_evicted_corrupt,
        expired_events = report.events_expired,
        corrupt_events = report.events_corrupted,
        "cleanup pass finished"
    );
    Ok(report)
}

/// Destructive reset: drop every pending event, valid or not, and evict dead
/// connections. Safe to call repeatedly.
pub async fn clear_events(state: &SharedState) -> Result<ClearResponse, ServiceError> {
    let now = now_ms();
    let ttl = state.config().connection_ttl_ms();

    let events_cleared = state.outbox().clear_all().await?;
    let connection_sweep = state.connections().sweep(now, ttl).await?;

    info!(events_cleared, "event outbox cleared by operator");
    Ok(ClearResponse {
        events_cleared,
        connections_evicted: connection_sweep.evicted_stale + connection_sweep.evicted_corrupt,
    })
}

/// Push an operator message onto the global feed.
pub async fn broadcast_message(state: &SharedState, message: &str) {
    events::broadcast_out_of_band(state, message).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryStore;
    use crate::dao::models::{ConnectionRecord, EventEnvelope, EventPayload};
    use crate::dao::store::SharedStore;
    use crate::state::AppState;

    async fn test_state() -> (SharedState, Arc<dyn SharedStore>) {
        let state = AppState::new(AppConfig::default());
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        state.install_store(store.clone()).await;
        (state, store)
    }

    fn message(now: u64, ttl: u64) -> EventEnvelope {
        EventEnvelope::new(
            EventPayload::OutOfBandMessage { message: "m".into() },
            None,
            None,
            now,
            ttl,
        )
    }

    #[tokio::test]
    async fn cleanup_keeps_exactly_the_valid_entries() {
        let (state, store) = test_state().await;
        let now = now_ms();
        let ttl = state.config().connection_ttl_ms();

        // one valid connection, one heartbeat-expired, one unparseable
        state
            .connections()
            .put(&ConnectionRecord::new("live", "alice", now))
            .await
            .unwrap();
        state
            .connections()
            .put(&ConnectionRecord::new("stale", "bob", now.saturating_sub(2 * ttl)))
            .await
            .unwrap();
        store
            .hset("gambit:connections", "mangled", "{oops".into())
            .await
            .unwrap();

        // one pending event, one already expired, one unparseable
        state.outbox().publish(&message(now, 60_000)).await.unwrap();
        state.outbox().publish(&message(now.saturating_sub(120_000), 1)).await.unwrap();
        store.hset("gambit:events", "junk", "}{".into()).await.unwrap();

        let report = cleanup(&state).await.unwrap();
        assert_eq!(report.connections_evicted_stale, 1);
        assert_eq!(report.connections_evicted_corrupt, 1);
        assert_eq!(report.events_expired, 1);
        assert_eq!(report.events_corrupted, 1);

        // the table is down to the one valid row
        let rows = store.hgetall("gambit:connections").await.unwrap();
        assert_eq!(rows.len(), 1);
        let active = state.connections().list_active(now, ttl).await.unwrap();
        assert_eq!(active[0].connection_id, "live");

        // the pending valid event survived for its consumers
        let drained = state.outbox().drain_all(now).await.unwrap();
        assert_eq!(drained.valid.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_twice_is_idempotent() {
        let (state, store) = test_state().await;
        store
            .hset("gambit:connections", "mangled", "{oops".into())
            .await
            .unwrap();

        let first = cleanup(&state).await.unwrap();
        assert_eq!(first.connections_evicted_corrupt, 1);
        let second = cleanup(&state).await.unwrap();
        assert_eq!(second.connections_evicted_corrupt, 0);
    }

    #[tokio::test]
    async fn clear_drops_valid_pending_events_too() {
        let (state, _) = test_state().await;
        let now = now_ms();
        state.outbox().publish(&message(now, 60_000)).await.unwrap();
        state.outbox().publish(&message(now, 60_000)).await.unwrap();

        let report = clear_events(&state).await.unwrap();
        assert_eq!(report.events_cleared, 2);
        assert!(state.outbox().drain_all(now).await.unwrap().valid.is_empty());
    }

    #[tokio::test]
    async fn diagnostics_reports_totals_and_per_scope_counts() {
        let (state, _) = test_state().await;
        let now = now_ms();

        let mut watcher = ConnectionRecord::new("c1", "alice", now);
        watcher.subscriptions.insert("game-a".into());
        state.connections().put(&watcher).await.unwrap();
        state
            .connections()
            .put(&ConnectionRecord::new("c2", "bob", now))
            .await
            .unwrap();

        let report = diagnostics(&state).await.unwrap();
        assert!(!report.degraded);
        assert_eq!(report.total_connections, 2);
        assert_eq!(report.local_connections, 0);
        assert_eq!(report.viewers_per_scope.get("game-a"), Some(&1));
    }

    #[tokio::test]
    async fn diagnostics_degrades_to_local_view_without_storage() {
        let state = AppState::new(AppConfig::default());
        let report = diagnostics(&state).await.unwrap();
        assert!(report.degraded);
        assert_eq!(report.total_connections, 0);
        assert!(report.connections.is_empty());
    }
}
