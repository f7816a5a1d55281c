use tracing::{debug, warn};

use crate::dao::models::ConnectionRecord;
use crate::dao::storage::{StorageError, StorageResult};
use crate::dao::store::StoreHandle;

/// Hash table holding one row per open viewer stream.
const CONNECTIONS_TABLE: &str = "gambit:connections";

/// Outcome of a listing pass over the connection table.
#[derive(Debug, Default)]
pub struct ConnectionSweep {
    /// Rows whose heartbeat is within the TTL.
    pub active: Vec<ConnectionRecord>,
    /// Rows evicted because their heartbeat expired.
    pub evicted_stale: usize,
    /// Rows evicted because they failed to deserialize.
    pub evicted_corrupt: usize,
}

/// The shared connection table: durable metadata for every open stream,
/// whichever process owns it.
///
/// Listing doubles as garbage collection — stale and corrupt rows found along
/// the way are deleted, never returned, and never surfaced as errors.
#[derive(Clone)]
pub struct ConnectionTable {
    store: StoreHandle,
}

impl ConnectionTable {
    /// Build a table view over the shared store handle.
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Upsert a row, overwriting any existing entry entirely.
    pub async fn put(&self, record: &ConnectionRecord) -> StorageResult<()> {
        let store = self.store.require().await?;
        let serialized = serde_json::to_string(record).map_err(|err| {
            StorageError::unavailable(
                format!("serialize connection `{}`", record.connection_id),
                err,
            )
        })?;
        store
            .hset(CONNECTIONS_TABLE, &record.connection_id, serialized)
            .await
    }

    /// Read a single row. Corrupt rows read as absent and are deleted.
    pub async fn get(&self, connection_id: &str) -> StorageResult<Option<ConnectionRecord>> {
        let store = self.store.require().await?;
        let Some(raw) = store.hget(CONNECTIONS_TABLE, connection_id).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ConnectionRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(connection_id, error = %err, "discarding corrupt connection row");
                store
                    .hdel(CONNECTIONS_TABLE, vec![connection_id.to_string()])
                    .await?;
                Ok(None)
            }
        }
    }

    /// Read-modify-write a single row. A no-op returning `false` when the row
    /// has disappeared (or turned corrupt) between read and write.
    ///
    /// Last-writer-wins: no concurrency token, since staleness only shifts
    /// TTL-based eviction timing.
    pub async fn patch<F>(&self, connection_id: &str, mutate: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut ConnectionRecord),
    {
        let Some(mut record) = self.get(connection_id).await? else {
            return Ok(false);
        };
        mutate(&mut record);
        self.put(&record).await?;
        Ok(true)
    }

    /// Refresh a row's heartbeat to `now`.
    pub async fn touch(&self, connection_id: &str, now: u64) -> StorageResult<bool> {
        self.patch(connection_id, |record| record.last_heartbeat = now)
            .await
    }

    /// Idempotent delete.
    pub async fn remove(&self, connection_id: &str) -> StorageResult<()> {
        let store = self.store.require().await?;
        store
            .hdel(CONNECTIONS_TABLE, vec![connection_id.to_string()])
            .await
    }

    /// All rows whose heartbeat is within `ttl_ms` of `now`.
    ///
    /// Side effect: stale and corrupt rows are deleted from the table.
    pub async fn list_active(&self, now: u64, ttl_ms: u64) -> StorageResult<Vec<ConnectionRecord>> {
        Ok(self.sweep(now, ttl_ms).await?.active)
    }

    /// Listing pass with eviction counts, used by the admin surface.
    pub async fn sweep(&self, now: u64, ttl_ms: u64) -> StorageResult<ConnectionSweep> {
        let store = self.store.require().await?;
        let rows = store.hgetall(CONNECTIONS_TABLE).await?;

        let mut outcome = ConnectionSweep::default();
        let mut doomed = Vec::new();

        for (field, raw) in rows {
            match serde_json::from_str::<ConnectionRecord>(&raw) {
                Ok(record) if record.is_live(now, ttl_ms) => outcome.active.push(record),
                Ok(record) => {
                    debug!(
                        connection_id = %record.connection_id,
                        last_heartbeat = record.last_heartbeat,
                        "evicting connection with expired heartbeat"
                    );
                    outcome.evicted_stale += 1;
                    doomed.push(field);
                }
                Err(err) => {
                    warn!(field, error = %err, "evicting corrupt connection row");
                    outcome.evicted_corrupt += 1;
                    doomed.push(field);
                }
            }
        }

        if !doomed.is_empty() {
            store.hdel(CONNECTIONS_TABLE, doomed).await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::memory::MemoryStore;
    use crate::dao::store::SharedStore;

    async fn table_with_store() -> (ConnectionTable, Arc<dyn SharedStore>) {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let handle = StoreHandle::new();
        handle.install(store.clone()).await;
        (ConnectionTable::new(handle), store)
    }

    #[tokio::test]
    async fn put_then_list_returns_live_row() {
        let (table, _) = table_with_store().await;
        table
            .put(&ConnectionRecord::new("c1", "alice", 1_000))
            .await
            .unwrap();

        let active = table.list_active(2_000, 60_000).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].owner_id, "alice");
    }

    #[tokio::test]
    async fn listing_evicts_stale_rows_permanently() {
        let (table, _) = table_with_store().await;
        table
            .put(&ConnectionRecord::new("c1", "alice", 1_000))
            .await
            .unwrap();
        table
            .put(&ConnectionRecord::new("c2", "bob", 90_000))
            .await
            .unwrap();

        let sweep = table.sweep(100_000, 60_000).await.unwrap();
        assert_eq!(sweep.active.len(), 1);
        assert_eq!(sweep.evicted_stale, 1);

        // the stale row is gone even for a later, more lenient listing
        let relisted = table.list_active(100_000, u64::MAX).await.unwrap();
        assert_eq!(relisted.len(), 1);
        assert_eq!(relisted[0].connection_id, "c2");
    }

    #[tokio::test]
    async fn listing_discards_corrupt_rows_without_failing() {
        let (table, store) = table_with_store().await;
        table
            .put(&ConnectionRecord::new("c1", "alice", 1_000))
            .await
            .unwrap();
        store
            .hset("gambit:connections", "broken", "{not json".into())
            .await
            .unwrap();

        let sweep = table.sweep(2_000, 60_000).await.unwrap();
        assert_eq!(sweep.active.len(), 1);
        assert_eq!(sweep.evicted_corrupt, 1);
        assert!(
            store
                .hget("gambit:connections", "broken")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn patch_is_noop_when_row_is_gone() {
        let (table, _) = table_with_store().await;
        let patched = table.touch("ghost", 5_000).await.unwrap();
        assert!(!patched);
    }

    #[tokio::test]
    async fn patch_appends_subscription() {
        let (table, _) = table_with_store().await;
        table
            .put(&ConnectionRecord::new("c1", "alice", 1_000))
            .await
            .unwrap();

        let patched = table
            .patch("c1", |record| {
                record.subscriptions.insert("game-a".into());
            })
            .await
            .unwrap();
        assert!(patched);

        let active = table.list_active(1_500, 60_000).await.unwrap();
        assert!(active[0].subscriptions.contains("game-a"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (table, _) = table_with_store().await;
        table
            .put(&ConnectionRecord::new("c1", "alice", 1_000))
            .await
            .unwrap();
        table.remove("c1").await.unwrap();
        table.remove("c1").await.unwrap();
        assert!(table.list_active(1_500, 60_000).await.unwrap().is_empty());
    }
}
