use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::dao::models::now_ms;
use crate::dao::storage::StorageResult;
use crate::dao::store::{SharedStore, slice_bounds};

/// In-process [`SharedStore`] used for tests and single-process deployments.
///
/// Not shared across processes, so it only exercises the same contract the
/// durable backends honor: single-key atomicity, lazy TTL expiry on read.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    /// Key-level expiry deadlines (epoch millis), purged lazily on access.
    deadlines: HashMap<String, u64>,
}

impl MemoryInner {
    /// Drop any container whose coarse deadline has passed.
    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .deadlines
            .get(key)
            .is_some_and(|deadline| now_ms() >= *deadline);
        if expired {
            self.deadlines.remove(key);
            self.strings.remove(key);
            self.hashes.remove(key);
            self.lists.remove(key);
            self.zsets.remove(key);
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, work: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        work(&mut guard)
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            Ok(store.with_inner(|inner| {
                inner.purge_expired(&key);
                inner.strings.get(&key).cloned()
            }))
        })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner.strings.insert(key, value);
            });
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner.strings.remove(&key);
                inner.hashes.remove(&key);
                inner.lists.remove(&key);
                inner.zsets.remove(&key);
                inner.deadlines.remove(&key);
            });
            Ok(())
        })
    }

    fn hset(
        &self,
        table: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let table = table.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner.purge_expired(&table);
                inner.hashes.entry(table).or_default().insert(field, value);
            });
            Ok(())
        })
    }

    fn hget(&self, table: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let store = self.clone();
        let table = table.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            Ok(store.with_inner(|inner| {
                inner.purge_expired(&table);
                inner
                    .hashes
                    .get(&table)
                    .and_then(|fields| fields.get(&field).cloned())
            }))
        })
    }

    fn hgetall(&self, table: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>> {
        let store = self.clone();
        let table = table.to_owned();
        Box::pin(async move {
            Ok(store.with_inner(|inner| {
                inner.purge_expired(&table);
                inner
                    .hashes
                    .get(&table)
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|(field, value)| (field.clone(), value.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            }))
        })
    }

    fn hdel(&self, table: &str, fields: Vec<String>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let table = table.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                if let Some(entries) = inner.hashes.get_mut(&table) {
                    for field in &fields {
                        entries.remove(field);
                    }
                }
            });
            Ok(())
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner
                    .deadlines
                    .insert(key, now_ms().saturating_add(ttl.as_millis() as u64));
            });
            Ok(())
        })
    }

    fn rpush(&self, key: &str, item: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner.purge_expired(&key);
                inner.lists.entry(key).or_default().push(item);
            });
            Ok(())
        })
    }

    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            Ok(store.with_inner(|inner| {
                inner.purge_expired(&key);
                let items = inner.lists.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                match slice_bounds(items.len(), start, stop) {
                    Some((from, to)) => items[from..to].to_vec(),
                    None => Vec::new(),
                }
            }))
        })
    }

    fn zadd(
        &self,
        key: &str,
        member: String,
        score: f64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store.with_inner(|inner| {
                inner.purge_expired(&key);
                let members = inner.zsets.entry(key).or_default();
                match members.iter_mut().find(|(existing, _)| *existing == member) {
                    Some(entry) => entry.1 = score,
                    None => members.push((member, score)),
                }
                members.sort_by(|a, b| a.1.total_cmp(&b.1));
            });
            Ok(())
        })
    }

    fn zrange_rev(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            Ok(store.with_inner(|inner| {
                inner.purge_expired(&key);
                let mut members: Vec<String> = inner
                    .zsets
                    .get(&key)
                    .map(|entries| entries.iter().map(|(member, _)| member.clone()).collect())
                    .unwrap_or_default();
                members.reverse();
                match slice_bounds(members.len(), start, stop) {
                    Some((from, to)) => members[from..to].to_vec(),
                    None => Vec::new(),
                }
            }))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_fields_are_independent() {
        let store = MemoryStore::new();
        store.hset("t", "a", "1".into()).await.unwrap();
        store.hset("t", "b", "2".into()).await.unwrap();
        store.hdel("t", vec!["a".into()]).await.unwrap();

        let mut remaining = store.hgetall("t").await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec![("b".to_string(), "2".to_string())]);
    }

    #[tokio::test]
    async fn expired_table_reads_empty() {
        let store = MemoryStore::new();
        store.hset("t", "a", "1".into()).await.unwrap();
        store.expire("t", Duration::from_millis(0)).await.unwrap();

        assert!(store.hgetall("t").await.unwrap().is_empty());
        assert_eq!(store.hget("t", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lrange_supports_negative_bounds() {
        let store = MemoryStore::new();
        for item in ["a", "b", "c", "d"] {
            store.rpush("log", item.into()).await.unwrap();
        }

        assert_eq!(store.lrange("log", 0, -1).await.unwrap().len(), 4);
        assert_eq!(
            store.lrange("log", -2, -1).await.unwrap(),
            vec!["c".to_string(), "d".to_string()]
        );
        assert!(store.lrange("log", 4, 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zrange_rev_orders_by_score_descending() {
        let store = MemoryStore::new();
        store.zadd("recent", "old".into(), 1.0).await.unwrap();
        store.zadd("recent", "new".into(), 3.0).await.unwrap();
        store.zadd("recent", "mid".into(), 2.0).await.unwrap();
        // rescoring moves a member, it does not duplicate it
        store.zadd("recent", "old".into(), 4.0).await.unwrap();

        assert_eq!(
            store.zrange_rev("recent", 0, -1).await.unwrap(),
            vec!["old".to_string(), "new".to_string(), "mid".to_string()]
        );
    }
}
