use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::dao::models::EventPayload;

/// One live stream owned by this process.
pub struct LocalStream {
    /// Stable viewer identity behind the stream.
    pub owner_id: String,
    /// Producer half of the stream's payload channel.
    pub tx: mpsc::UnboundedSender<EventPayload>,
    /// Scopes this stream subscribed to.
    pub subscriptions: BTreeSet<String>,
}

/// Snapshot of a registered stream, detached from the registry's locks so
/// callers can push without holding a shard.
pub struct LocalTarget {
    /// Connection identifier.
    pub connection_id: String,
    /// Stable viewer identity.
    pub owner_id: String,
    /// Producer half of the payload channel.
    pub tx: mpsc::UnboundedSender<EventPayload>,
    /// Scopes at snapshot time.
    pub subscriptions: BTreeSet<String>,
}

/// Registry of live streams in this process, keyed by connection id.
///
/// Purely a latency shortcut for the co-located case: under serverless
/// execution this map is routinely empty while real viewers are connected
/// elsewhere, so a zero count here never means zero viewers.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<String, LocalStream>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened stream.
    pub fn register(
        &self,
        connection_id: impl Into<String>,
        owner_id: impl Into<String>,
        tx: mpsc::UnboundedSender<EventPayload>,
        subscriptions: BTreeSet<String>,
    ) {
        self.streams.insert(
            connection_id.into(),
            LocalStream {
                owner_id: owner_id.into(),
                tx,
                subscriptions,
            },
        );
    }

    /// Drop a stream, returning its final subscriptions when it was present.
    /// Idempotent; later calls return `None`.
    pub fn unregister(&self, connection_id: &str) -> Option<BTreeSet<String>> {
        self.streams
            .remove(connection_id)
            .map(|(_, stream)| stream.subscriptions)
    }

    /// Add a scope to a stream's subscription set. `false` when the stream is
    /// not registered here.
    pub fn subscribe(&self, connection_id: &str, scope: &str) -> bool {
        match self.streams.get_mut(connection_id) {
            Some(mut stream) => {
                stream.subscriptions.insert(scope.to_owned());
                true
            }
            None => false,
        }
    }

    /// Current subscriptions of a stream, when registered here.
    pub fn subscriptions_of(&self, connection_id: &str) -> Option<BTreeSet<String>> {
        self.streams
            .get(connection_id)
            .map(|stream| stream.subscriptions.clone())
    }

    /// Owner of a stream, when registered here.
    pub fn owner_of(&self, connection_id: &str) -> Option<String> {
        self.streams
            .get(connection_id)
            .map(|stream| stream.owner_id.clone())
    }

    /// Number of live local streams, optionally narrowed to one scope.
    pub fn count_for(&self, scope: Option<&str>) -> usize {
        match scope {
            None => self.streams.len(),
            Some(scope) => self
                .streams
                .iter()
                .filter(|entry| entry.subscriptions.contains(scope))
                .count(),
        }
    }

    /// Detached snapshot of every registered stream.
    pub fn snapshot(&self) -> Vec<LocalTarget> {
        self.streams
            .iter()
            .map(|entry| LocalTarget {
                connection_id: entry.key().clone(),
                owner_id: entry.owner_id.clone(),
                tx: entry.tx.clone(),
                subscriptions: entry.subscriptions.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::UnboundedSender<EventPayload> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[test]
    fn count_for_narrows_by_scope() {
        let registry = StreamRegistry::new();
        registry.register("c1", "alice", channel(), BTreeSet::from(["game-a".to_string()]));
        registry.register("c2", "bob", channel(), BTreeSet::new());

        assert_eq!(registry.count_for(None), 2);
        assert_eq!(registry.count_for(Some("game-a")), 1);
        assert_eq!(registry.count_for(Some("game-b")), 0);
    }

    #[test]
    fn subscribe_targets_only_known_streams() {
        let registry = StreamRegistry::new();
        registry.register("c1", "alice", channel(), BTreeSet::new());

        assert!(registry.subscribe("c1", "game-a"));
        assert!(!registry.subscribe("ghost", "game-a"));
        assert_eq!(
            registry.subscriptions_of("c1").unwrap(),
            BTreeSet::from(["game-a".to_string()])
        );
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = StreamRegistry::new();
        registry.register("c1", "alice", channel(), BTreeSet::new());

        assert!(registry.unregister("c1").is_some());
        assert!(registry.unregister("c1").is_none());
        assert_eq!(registry.count_for(None), 0);
    }
}
