use std::time::Duration;

use tracing::warn;

use crate::dao::models::EventEnvelope;
use crate::dao::storage::{StorageError, StorageResult};
use crate::dao::store::StoreHandle;

/// Hash table holding queued event envelopes keyed by event id.
const EVENTS_TABLE: &str = "gambit:events";

/// Extra slack added to the coarse whole-table TTL beyond the newest
/// envelope's own deadline.
const TABLE_TTL_MARGIN: Duration = Duration::from_secs(60);

/// Result of a destructive drain pass.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Envelopes still within their TTL, oldest first.
    pub valid: Vec<EventEnvelope>,
    /// Envelopes discarded because their TTL had passed.
    pub expired: usize,
    /// Entries discarded because they failed to deserialize.
    pub corrupted: usize,
}

/// Non-destructive view of one outbox entry, for diagnostics.
#[derive(Debug)]
pub struct OutboxEntry {
    /// Outbox field key.
    pub event_id: String,
    /// Wire tag of the payload, when it parsed.
    pub kind: Option<String>,
    /// Creation time, when it parsed.
    pub created_at: Option<u64>,
    /// Deadline, when it parsed.
    pub expires_at: Option<u64>,
    /// TTL window has closed.
    pub is_expired: bool,
    /// Entry failed to deserialize.
    pub is_corrupted: bool,
}

/// The shared event outbox: the durable leg of every broadcast.
///
/// Deliberately a read-everything hash table. Draining reads every entry,
/// deletes everything it read (the consume step), and hands back only the
/// valid envelopes; concurrent drains racing over the same entries is the
/// accepted cost, which is why consumers must be idempotent.
#[derive(Clone)]
pub struct EventOutbox {
    store: StoreHandle,
}

impl EventOutbox {
    /// Build an outbox view over the shared store handle.
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Queue an envelope, refreshing the coarse table TTL so the whole table
    /// outlives the newest envelope but never lingers unbounded.
    pub async fn publish(&self, envelope: &EventEnvelope) -> StorageResult<()> {
        let store = self.store.require().await?;
        let serialized = serde_json::to_string(envelope).map_err(|err| {
            StorageError::unavailable(format!("serialize event `{}`", envelope.event_id), err)
        })?;
        store
            .hset(EVENTS_TABLE, &envelope.event_id, serialized)
            .await?;

        let ttl = Duration::from_millis(envelope.expires_at.saturating_sub(envelope.created_at))
            + TABLE_TTL_MARGIN;
        store.expire(EVENTS_TABLE, ttl).await
    }

    /// Destructively drain the whole table: every entry read is deleted,
    /// expired and corrupt entries are counted and dropped, and the surviving
    /// envelopes come back oldest first.
    pub async fn drain_all(&self, now: u64) -> StorageResult<DrainOutcome> {
        let store = self.store.require().await?;
        let rows = store.hgetall(EVENTS_TABLE).await?;
        if rows.is_empty() {
            return Ok(DrainOutcome::default());
        }

        let mut outcome = DrainOutcome::default();
        let mut consumed = Vec::with_capacity(rows.len());

        for (field, raw) in rows {
            consumed.push(field.clone());
            match serde_json::from_str::<EventEnvelope>(&raw) {
                Ok(envelope) if envelope.is_expired(now) => outcome.expired += 1,
                Ok(envelope) => outcome.valid.push(envelope),
                Err(err) => {
                    warn!(field, error = %err, "discarding corrupt outbox entry");
                    outcome.corrupted += 1;
                }
            }
        }

        store.hdel(EVENTS_TABLE, consumed).await?;
        outcome.valid.sort_by_key(|envelope| envelope.created_at);
        Ok(outcome)
    }

    /// Non-destructive read annotating every entry, corrupt ones included.
    pub async fn peek(&self, now: u64) -> StorageResult<Vec<OutboxEntry>> {
        let store = self.store.require().await?;
        let rows = store.hgetall(EVENTS_TABLE).await?;

        let mut entries: Vec<OutboxEntry> = rows
            .into_iter()
            .map(|(field, raw)| match serde_json::from_str::<EventEnvelope>(&raw) {
                Ok(envelope) => OutboxEntry {
                    event_id: field,
                    kind: Some(envelope.payload.kind().to_string()),
                    created_at: Some(envelope.created_at),
                    expires_at: Some(envelope.expires_at),
                    is_expired: envelope.is_expired(now),
                    is_corrupted: false,
                },
                Err(_) => OutboxEntry {
                    event_id: field,
                    kind: None,
                    created_at: None,
                    expires_at: None,
                    is_expired: false,
                    is_corrupted: true,
                },
            })
            .collect();
        entries.sort_by_key(|entry| entry.created_at.unwrap_or(0));
        Ok(entries)
    }

    /// Delete only expired and corrupt entries, leaving pending valid
    /// envelopes for their consumers. Returns `(expired, corrupted)` counts.
    pub async fn sweep(&self, now: u64) -> StorageResult<(usize, usize)> {
        let store = self.store.require().await?;
        let rows = store.hgetall(EVENTS_TABLE).await?;

        let mut expired = 0;
        let mut corrupted = 0;
        let mut doomed = Vec::new();

        for (field, raw) in rows {
            match serde_json::from_str::<EventEnvelope>(&raw) {
                Ok(envelope) if envelope.is_expired(now) => {
                    expired += 1;
                    doomed.push(field);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(field, error = %err, "sweeping corrupt outbox entry");
                    corrupted += 1;
                    doomed.push(field);
                }
            }
        }

        if !doomed.is_empty() {
            store.hdel(EVENTS_TABLE, doomed).await?;
        }
        Ok((expired, corrupted))
    }

    /// Administrative nuke of every pending entry. Returns how many were
    /// dropped.
    pub async fn clear_all(&self) -> StorageResult<usize> {
        let store = self.store.require().await?;
        let rows = store.hgetall(EVENTS_TABLE).await?;
        let count = rows.len();
        store.delete(EVENTS_TABLE).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::models::EventPayload;
    use crate::dao::store::SharedStore;
    use crate::dao::memory::MemoryStore;

    const TTL: u64 = 30_000;

    async fn outbox_with_store() -> (EventOutbox, Arc<dyn SharedStore>) {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let handle = StoreHandle::new();
        handle.install(store.clone()).await;
        (EventOutbox::new(handle), store)
    }

    fn message(text: &str, now: u64) -> EventEnvelope {
        EventEnvelope::new(
            EventPayload::OutOfBandMessage {
                message: text.into(),
            },
            None,
            None,
            now,
            TTL,
        )
    }

    #[tokio::test]
    async fn drain_consumes_entries_exactly_once_per_pass() {
        let (outbox, _) = outbox_with_store().await;
        outbox.publish(&message("one", 1_000)).await.unwrap();
        outbox.publish(&message("two", 2_000)).await.unwrap();

        let first = outbox.drain_all(3_000).await.unwrap();
        assert_eq!(first.valid.len(), 2);
        // oldest first
        assert_eq!(first.valid[0].created_at, 1_000);

        let second = outbox.drain_all(3_000).await.unwrap();
        assert!(second.valid.is_empty());
    }

    #[tokio::test]
    async fn expired_envelope_is_never_returned_but_peek_reports_it() {
        let (outbox, _) = outbox_with_store().await;
        let stale = message("late", 1_000);
        outbox.publish(&stale).await.unwrap();

        let peeked = outbox.peek(1_000 + TTL).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert!(peeked[0].is_expired);
        assert!(!peeked[0].is_corrupted);

        let drained = outbox.drain_all(1_000 + TTL).await.unwrap();
        assert!(drained.valid.is_empty());
        assert_eq!(drained.expired, 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_flagged_by_peek_and_dropped_by_drain() {
        let (outbox, store) = outbox_with_store().await;
        outbox.publish(&message("fine", 1_000)).await.unwrap();
        store
            .hset("gambit:events", "mangled", "][".into())
            .await
            .unwrap();

        let peeked = outbox.peek(2_000).await.unwrap();
        assert!(peeked.iter().any(|entry| entry.is_corrupted));

        let drained = outbox.drain_all(2_000).await.unwrap();
        assert_eq!(drained.valid.len(), 1);
        assert_eq!(drained.corrupted, 1);
        assert!(store.hgetall("gambit:events").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_pending_valid_envelopes() {
        let (outbox, store) = outbox_with_store().await;
        outbox.publish(&message("pending", 10_000)).await.unwrap();
        outbox.publish(&message("old", 0)).await.unwrap();
        store
            .hset("gambit:events", "mangled", "not json".into())
            .await
            .unwrap();

        // "old" (expires at 30_000) is past its deadline, "pending" is not
        let (expired, corrupted) = outbox.sweep(35_000).await.unwrap();
        assert_eq!((expired, corrupted), (1, 1));

        let remaining = outbox.drain_all(36_000).await.unwrap();
        assert_eq!(remaining.valid.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_is_idempotent() {
        let (outbox, _) = outbox_with_store().await;
        outbox.publish(&message("doomed", 1_000)).await.unwrap();
        assert_eq!(outbox.clear_all().await.unwrap(), 1);
        assert_eq!(outbox.clear_all().await.unwrap(), 0);
    }
}
