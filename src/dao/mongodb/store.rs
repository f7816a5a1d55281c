use std::sync::Arc;
use std::time::Duration;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Database,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::models::now_ms;
use crate::dao::storage::StorageResult;
use crate::dao::store::{SharedStore, slice_bounds};

const STRINGS_COLLECTION: &str = "kv_strings";
const HASH_COLLECTION: &str = "kv_hash_entries";
const LISTS_COLLECTION: &str = "kv_lists";
const ZSET_COLLECTION: &str = "kv_zset_entries";
const EXPIRIES_COLLECTION: &str = "kv_expiries";

/// Separator for composite `_id` values; control character so it cannot
/// collide with table or field names.
const COMPOSITE_SEP: char = '\u{1}';

/// MongoDB-backed [`SharedStore`].
///
/// Hash tables map to one document per field, lists to a single document
/// with an array, sorted sets to one document per member. Coarse key TTLs
/// live in their own collection and are enforced lazily on access, matching
/// the contract the in-memory backend honors.
#[derive(Clone)]
pub struct MongoSharedStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn database(&self) -> Database {
        let guard = self.state.read().await;
        guard.database.clone()
    }

    async fn ping(&self) -> MongoResult<()> {
        let database = self.database().await;
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }

    /// Drop every container behind `key` if its coarse deadline has passed.
    async fn purge_if_expired(&self, key: &str) -> MongoResult<()> {
        let database = self.database().await;
        let expiries = database.collection::<Document>(EXPIRIES_COLLECTION);
        let existing = expiries
            .find_one(doc! { "_id": key })
            .await
            .map_err(|source| read_err(key, source))?;
        let Some(entry) = existing else {
            return Ok(());
        };
        let deadline = entry.get_i64("deadline").unwrap_or(i64::MAX);
        if (now_ms() as i64) < deadline {
            return Ok(());
        }

        delete_key_everywhere(&database, key).await?;
        Ok(())
    }
}

fn read_err(key: &str, source: mongodb::error::Error) -> MongoDaoError {
    MongoDaoError::Read {
        key: key.to_owned(),
        source,
    }
}

fn write_err(key: &str, source: mongodb::error::Error) -> MongoDaoError {
    MongoDaoError::Write {
        key: key.to_owned(),
        source,
    }
}

fn delete_err(key: &str, source: mongodb::error::Error) -> MongoDaoError {
    MongoDaoError::Delete {
        key: key.to_owned(),
        source,
    }
}

async fn delete_key_everywhere(database: &Database, key: &str) -> MongoResult<()> {
    let strings = database.collection::<Document>(STRINGS_COLLECTION);
    let hashes = database.collection::<Document>(HASH_COLLECTION);
    let lists = database.collection::<Document>(LISTS_COLLECTION);
    let zsets = database.collection::<Document>(ZSET_COLLECTION);
    let expiries = database.collection::<Document>(EXPIRIES_COLLECTION);

    strings
        .delete_one(doc! { "_id": key })
        .await
        .map_err(|source| delete_err(key, source))?;
    hashes
        .delete_many(doc! { "table": key })
        .await
        .map_err(|source| delete_err(key, source))?;
    lists
        .delete_one(doc! { "_id": key })
        .await
        .map_err(|source| delete_err(key, source))?;
    zsets
        .delete_many(doc! { "key": key })
        .await
        .map_err(|source| delete_err(key, source))?;
    expiries
        .delete_one(doc! { "_id": key })
        .await
        .map_err(|source| delete_err(key, source))?;
    Ok(())
}

impl MongoSharedStore {
    /// Establish a connection and ensure supporting indexes exist.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.inner.database().await;

        let hash_index = mongodb::IndexModel::builder()
            .keys(doc! { "table": 1 })
            .options(IndexOptions::builder().build())
            .build();
        database
            .collection::<Document>(HASH_COLLECTION)
            .create_index(hash_index)
            .await
            .map_err(|source| write_err(HASH_COLLECTION, source))?;

        let zset_index = mongodb::IndexModel::builder()
            .keys(doc! { "key": 1, "score": 1 })
            .options(IndexOptions::builder().build())
            .build();
        database
            .collection::<Document>(ZSET_COLLECTION)
            .create_index(zset_index)
            .await
            .map_err(|source| write_err(ZSET_COLLECTION, source))?;

        Ok(())
    }
}

impl SharedStore for MongoSharedStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&key).await?;
            let database = inner.database().await;
            let found = database
                .collection::<Document>(STRINGS_COLLECTION)
                .find_one(doc! { "_id": &key })
                .await
                .map_err(|source| read_err(&key, source))?;
            Ok(found.and_then(|entry| entry.get_str("value").ok().map(str::to_owned)))
        })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let database = inner.database().await;
            database
                .collection::<Document>(STRINGS_COLLECTION)
                .update_one(
                    doc! { "_id": &key },
                    doc! { "$set": { "value": value } },
                )
                .upsert(true)
                .await
                .map_err(|source| write_err(&key, source))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let database = inner.database().await;
            delete_key_everywhere(&database, &key).await?;
            Ok(())
        })
    }

    fn hset(
        &self,
        table: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let table = table.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&table).await?;
            let database = inner.database().await;
            let composite = format!("{table}{COMPOSITE_SEP}{field}");
            database
                .collection::<Document>(HASH_COLLECTION)
                .update_one(
                    doc! { "_id": &composite },
                    doc! { "$set": { "table": &table, "field": &field, "value": value } },
                )
                .upsert(true)
                .await
                .map_err(|source| write_err(&table, source))?;
            Ok(())
        })
    }

    fn hget(&self, table: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let inner = self.inner.clone();
        let table = table.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&table).await?;
            let database = inner.database().await;
            let composite = format!("{table}{COMPOSITE_SEP}{field}");
            let found = database
                .collection::<Document>(HASH_COLLECTION)
                .find_one(doc! { "_id": &composite })
                .await
                .map_err(|source| read_err(&table, source))?;
            Ok(found.and_then(|entry| entry.get_str("value").ok().map(str::to_owned)))
        })
    }

    fn hgetall(&self, table: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>> {
        let inner = self.inner.clone();
        let table = table.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&table).await?;
            let database = inner.database().await;
            let entries: Vec<Document> = database
                .collection::<Document>(HASH_COLLECTION)
                .find(doc! { "table": &table })
                .await
                .map_err(|source| read_err(&table, source))?
                .try_collect()
                .await
                .map_err(|source| read_err(&table, source))?;

            Ok(entries
                .into_iter()
                .filter_map(|entry| {
                    let field = entry.get_str("field").ok()?.to_owned();
                    let value = entry.get_str("value").ok()?.to_owned();
                    Some((field, value))
                })
                .collect())
        })
    }

    fn hdel(&self, table: &str, fields: Vec<String>) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let table = table.to_owned();
        Box::pin(async move {
            let database = inner.database().await;
            let ids: Vec<String> = fields
                .iter()
                .map(|field| format!("{table}{COMPOSITE_SEP}{field}"))
                .collect();
            database
                .collection::<Document>(HASH_COLLECTION)
                .delete_many(doc! { "_id": { "$in": ids } })
                .await
                .map_err(|source| delete_err(&table, source))?;
            Ok(())
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let database = inner.database().await;
            let deadline = now_ms() as i64 + ttl.as_millis() as i64;
            database
                .collection::<Document>(EXPIRIES_COLLECTION)
                .update_one(
                    doc! { "_id": &key },
                    doc! { "$set": { "deadline": deadline } },
                )
                .upsert(true)
                .await
                .map_err(|source| write_err(&key, source))?;
            Ok(())
        })
    }

    fn rpush(&self, key: &str, item: String) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&key).await?;
            let database = inner.database().await;
            database
                .collection::<Document>(LISTS_COLLECTION)
                .update_one(
                    doc! { "_id": &key },
                    doc! { "$push": { "items": item } },
                )
                .upsert(true)
                .await
                .map_err(|source| write_err(&key, source))?;
            Ok(())
        })
    }

    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&key).await?;
            let database = inner.database().await;
            let found = database
                .collection::<Document>(LISTS_COLLECTION)
                .find_one(doc! { "_id": &key })
                .await
                .map_err(|source| read_err(&key, source))?;

            let items: Vec<String> = found
                .and_then(|entry| entry.get_array("items").ok().cloned())
                .map(|values| {
                    values
                        .into_iter()
                        .filter_map(|value| value.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();

            Ok(match slice_bounds(items.len(), start, stop) {
                Some((from, to)) => items[from..to].to_vec(),
                None => Vec::new(),
            })
        })
    }

    fn zadd(
        &self,
        key: &str,
        member: String,
        score: f64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&key).await?;
            let database = inner.database().await;
            let composite = format!("{key}{COMPOSITE_SEP}{member}");
            database
                .collection::<Document>(ZSET_COLLECTION)
                .update_one(
                    doc! { "_id": &composite },
                    doc! { "$set": { "key": &key, "member": member, "score": score } },
                )
                .upsert(true)
                .await
                .map_err(|source| write_err(&key, source))?;
            Ok(())
        })
    }

    fn zrange_rev(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.purge_if_expired(&key).await?;
            let database = inner.database().await;
            let entries: Vec<Document> = database
                .collection::<Document>(ZSET_COLLECTION)
                .find(doc! { "key": &key })
                .sort(doc! { "score": -1 })
                .await
                .map_err(|source| read_err(&key, source))?
                .try_collect()
                .await
                .map_err(|source| read_err(&key, source))?;

            let members: Vec<String> = entries
                .into_iter()
                .filter_map(|entry| entry.get_str("member").ok().map(str::to_owned))
                .collect();

            Ok(match slice_bounds(members.len(), start, stop) {
                Some((from, to)) => members[from..to].to_vec(),
                None => Vec::new(),
            })
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ping().await?;
            Ok(())
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.reconnect().await?;
            Ok(())
        })
    }
}
