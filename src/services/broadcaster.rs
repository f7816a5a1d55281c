use tracing::{debug, warn};

use crate::dao::event_outbox::EventOutbox;
use crate::dao::models::{EventEnvelope, EventPayload, now_ms};
use crate::services::registry::StreamRegistry;

/// Fans one event out to every eligible viewer, local and remote.
///
/// Delivery is two-legged: an immediate push to matching streams registered
/// in this process, then an unconditional durable publish so poll loops in
/// other processes pick the event up. The second leg runs even when the
/// first already reached every local viewer — remote viewers are invisible
/// here, and skipping the durable copy would silently drop them.
#[derive(Clone)]
pub struct Broadcaster {
    registry: StreamRegistry,
    outbox: EventOutbox,
    event_ttl_ms: u64,
}

impl Broadcaster {
    /// Wire a broadcaster over the local registry and the shared outbox.
    pub fn new(registry: StreamRegistry, outbox: EventOutbox, event_ttl_ms: u64) -> Self {
        Self {
            registry,
            outbox,
            event_ttl_ms,
        }
    }

    /// Deliver `payload` to every eligible connection. Fire-and-forget:
    /// internal failures are logged, never surfaced to the caller.
    pub async fn broadcast(
        &self,
        payload: EventPayload,
        target_scope: Option<String>,
        exclude_owner_id: Option<String>,
    ) {
        let envelope = EventEnvelope::new(
            payload,
            target_scope,
            exclude_owner_id,
            now_ms(),
            self.event_ttl_ms,
        );

        self.push_local(&envelope);

        if let Err(err) = self.outbox.publish(&envelope).await {
            warn!(
                kind = envelope.payload.kind(),
                error = %err,
                "durable publish failed; event was delivered to local streams only"
            );
        }
    }

    /// Immediate-delivery leg: push to matching live streams, evicting any
    /// whose channel is gone so one dead stream never stalls the rest.
    fn push_local(&self, envelope: &EventEnvelope) {
        let mut dead = Vec::new();

        for target in self.registry.snapshot() {
            if !envelope.matches(&target.subscriptions, &target.owner_id) {
                continue;
            }
            if target.tx.send(envelope.payload.clone()).is_err() {
                dead.push(target.connection_id);
            }
        }

        for connection_id in dead {
            debug!(connection_id, "evicting local stream with closed channel");
            self.registry.unregister(&connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::dao::memory::MemoryStore;
    use crate::dao::store::{SharedStore, StoreHandle};

    const TTL: u64 = 30_000;

    async fn broadcaster() -> (Broadcaster, StreamRegistry, EventOutbox) {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let handle = StoreHandle::new();
        handle.install(store).await;
        let registry = StreamRegistry::new();
        let outbox = EventOutbox::new(handle);
        (
            Broadcaster::new(registry.clone(), outbox.clone(), TTL),
            registry,
            outbox,
        )
    }

    fn subs(scopes: &[&str]) -> BTreeSet<String> {
        scopes.iter().map(|scope| scope.to_string()).collect()
    }

    fn stats() -> EventPayload {
        EventPayload::OutOfBandMessage {
            message: "hello".into(),
        }
    }

    #[tokio::test]
    async fn scoped_broadcast_skips_unsubscribed_and_excluded_streams() {
        let (broadcaster, registry, _) = broadcaster().await;

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();
        registry.register("c1", "alice", alice_tx, subs(&["game-a"]));
        registry.register("c2", "bob", bob_tx, subs(&["game-a"]));
        registry.register("c3", "carol", carol_tx, subs(&["game-b"]));

        broadcaster
            .broadcast(stats(), Some("game-a".into()), Some("alice".into()))
            .await;

        assert!(alice_rx.try_recv().is_err(), "excluded owner got the event");
        assert!(bob_rx.try_recv().is_ok(), "eligible viewer missed the event");
        assert!(carol_rx.try_recv().is_err(), "wrong scope got the event");
    }

    #[tokio::test]
    async fn exclusion_covers_every_stream_of_the_owner() {
        let (broadcaster, registry, _) = broadcaster().await;

        // two browser tabs, same viewer
        let (tab1_tx, mut tab1_rx) = mpsc::unbounded_channel();
        let (tab2_tx, mut tab2_rx) = mpsc::unbounded_channel();
        registry.register("c1", "alice", tab1_tx, subs(&["game-a"]));
        registry.register("c2", "alice", tab2_tx, subs(&["game-a"]));

        broadcaster
            .broadcast(stats(), Some("game-a".into()), Some("alice".into()))
            .await;

        assert!(tab1_rx.try_recv().is_err());
        assert!(tab2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn durable_copy_is_published_even_after_local_delivery() {
        let (broadcaster, registry, outbox) = broadcaster().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("c1", "bob", tx, subs(&["game-a"]));

        broadcaster
            .broadcast(stats(), Some("game-a".into()), None)
            .await;

        assert!(rx.try_recv().is_ok());
        let drained = outbox.drain_all(now_ms()).await.unwrap();
        assert_eq!(drained.valid.len(), 1, "durable leg was skipped");
    }

    #[tokio::test]
    async fn dead_stream_is_evicted_and_others_still_delivered() {
        let (broadcaster, registry, _) = broadcaster().await;

        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        registry.register("c1", "alice", dead_tx, BTreeSet::new());
        registry.register("c2", "bob", live_tx, BTreeSet::new());

        broadcaster.broadcast(stats(), None, None).await;

        assert!(live_rx.try_recv().is_ok());
        assert_eq!(registry.count_for(None), 1);
        assert!(registry.subscriptions_of("c1").is_none());
    }

    #[tokio::test]
    async fn broadcast_survives_missing_storage() {
        let registry = StreamRegistry::new();
        let outbox = EventOutbox::new(StoreHandle::new());
        let broadcaster = Broadcaster::new(registry.clone(), outbox, TTL);

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("c1", "bob", tx, BTreeSet::new());

        // degraded mode: local leg still delivers, no panic or error
        broadcaster.broadcast(stats(), None, None).await;
        assert!(rx.try_recv().is_ok());
    }
}
