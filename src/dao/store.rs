use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::dao::storage::{StorageError, StorageResult};

/// Abstraction over the shared key-value backend that stands in for a message
/// broker.
///
/// Two hash tables built on these primitives (the connection table and the
/// event outbox) are the only cross-process mutable state; everything else the
/// coordinator keeps is process-local. Only single-key atomicity is assumed —
/// read-modify-write sequences are last-writer-wins by design.
///
/// The trait also carries the plain key/list/sorted-set primitives used for
/// match records and move logs so one backend serves both concerns.
pub trait SharedStore: Send + Sync {
    /// Read a plain string value.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Upsert a plain string value.
    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Idempotent delete of a plain key.
    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;

    /// Upsert one field of a hash table.
    fn hset(
        &self,
        table: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Read one field of a hash table.
    fn hget(&self, table: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Read every field of a hash table.
    fn hgetall(&self, table: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>>;
    /// Idempotent delete of hash-table fields.
    fn hdel(&self, table: &str, fields: Vec<String>) -> BoxFuture<'static, StorageResult<()>>;

    /// Refresh a coarse TTL on an entire key (plain or hash). Backstop against
    /// orphaned data outliving its per-entry deadlines.
    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>>;

    /// Append an item to a list.
    fn rpush(&self, key: &str, item: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Read a list slice; negative indices count from the end, Redis-style.
    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>>;

    /// Insert or rescore a sorted-set member.
    fn zadd(&self, key: &str, member: String, score: f64)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Read sorted-set members by rank, highest score first.
    fn zrange_rev(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>>;

    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish the backend connection in place.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Swappable handle to the currently installed [`SharedStore`] backend.
///
/// Empty while the backend is unreachable; the storage supervisor installs
/// and clears it at runtime. Both durable tables and the match persistence
/// layer read through this handle so they degrade together.
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Arc<RwLock<Option<Arc<dyn SharedStore>>>>,
}

impl StoreHandle {
    /// Create a handle with no backend installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed backend, if any.
    pub async fn current(&self) -> Option<Arc<dyn SharedStore>> {
        let guard = self.inner.read().await;
        guard.as_ref().cloned()
    }

    /// The installed backend, or [`StorageError::Degraded`].
    pub async fn require(&self) -> StorageResult<Arc<dyn SharedStore>> {
        self.current().await.ok_or(StorageError::Degraded)
    }

    /// Install a backend, leaving degraded mode.
    pub async fn install(&self, store: Arc<dyn SharedStore>) {
        let mut guard = self.inner.write().await;
        *guard = Some(store);
    }

    /// Remove the backend, entering degraded mode.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.take();
    }

    /// Whether a backend is currently installed.
    pub async fn is_installed(&self) -> bool {
        let guard = self.inner.read().await;
        guard.is_some()
    }
}

/// Translate Redis-style inclusive `[start, stop]` bounds (negative counts
/// from the end) into a concrete half-open range over a sequence of length
/// `len`. `None` when the window is empty.
pub(crate) fn slice_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let from = if start < 0 {
        len.saturating_sub(start.unsigned_abs() as usize)
    } else {
        (start as usize).min(len)
    };
    let to = if stop < 0 {
        len.saturating_sub(stop.unsigned_abs() as usize - 1)
    } else {
        (stop as usize + 1).min(len)
    };
    (from < to).then_some((from, to))
}

#[cfg(test)]
mod tests {
    use super::slice_bounds;

    #[test]
    fn full_range_covers_everything() {
        assert_eq!(slice_bounds(4, 0, -1), Some((0, 4)));
    }

    #[test]
    fn negative_start_counts_from_the_end() {
        assert_eq!(slice_bounds(4, -2, -1), Some((2, 4)));
    }

    #[test]
    fn out_of_range_window_is_empty() {
        assert_eq!(slice_bounds(4, 4, 9), None);
        assert_eq!(slice_bounds(0, 0, -1), None);
    }
}
