//! Common test utilities for router and migration tests
//!
//! Provides shared helpers for:
//! - Building in-memory shard sets
//! - Seeding deterministic feed records by ring ownership
//! - Stores that fail, stall, or fail only some operations

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feedshard::sharding::hash_key;
use feedshard::{EntityKey, FeedError, FeedResult, HashRing, MemoryShardStore, Record, ShardStore};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

/// `n` empty shards, returned both concretely (for inspection) and as trait objects
pub fn memory_shards(n: usize) -> (Vec<MemoryShardStore>, Vec<Arc<dyn ShardStore>>) {
    let shards: Vec<MemoryShardStore> = (0..n).map(|_| MemoryShardStore::new()).collect();
    let stores = shards
        .iter()
        .map(|s| Arc::new(s.clone()) as Arc<dyn ShardStore>)
        .collect();
    (shards, stores)
}

/// Record `i` of `user`. Ids and timestamps are unique across all users.
pub fn post(user: EntityKey, i: i64) -> Record {
    let id = user * 100 + i;
    Record::new(id, user, at(id), format!("user {} post {}", user, i))
}

/// Place `posts` records per user on the owner of each user in `ring`
pub async fn seed_by_ring(
    stores: &[Arc<dyn ShardStore>],
    ring: &HashRing,
    users: impl IntoIterator<Item = EntityKey>,
    posts: i64,
) -> usize {
    let mut total = 0;
    for user in users {
        let owner = ring.owner(hash_key(user)).unwrap();
        let batch = (0..posts).map(|i| post(user, i)).collect();
        total += stores[owner].insert(batch).await.unwrap();
    }
    total
}

/// All records of `keys`, in feed order, straight from the shards
pub async fn brute_force_feed(stores: &[Arc<dyn ShardStore>], keys: &[EntityKey]) -> Vec<Record> {
    let mut all = Vec::new();
    for store in stores {
        all.extend(store.query(keys, None, usize::MAX).await.unwrap());
    }
    feedshard::model::sort_feed(&mut all);
    all
}

/// First key (from 1 upwards) owned by each shard of `ring`, in shard order
pub fn one_key_per_shard(ring: &HashRing) -> Vec<EntityKey> {
    ring.shards()
        .iter()
        .map(|&shard| {
            (1..)
                .find(|&k| ring.owner(hash_key(k)).unwrap() == shard)
                .unwrap()
        })
        .collect()
}

/// A shard whose queries always fail
pub struct FailingStore;

#[async_trait]
impl ShardStore for FailingStore {
    async fn query(&self, _: &[EntityKey], _: Option<DateTime<Utc>>, _: usize) -> FeedResult<Vec<Record>> {
        Err(FeedError::Store("connection refused".to_string()))
    }

    async fn insert(&self, _: Vec<Record>) -> FeedResult<usize> {
        Err(FeedError::Store("connection refused".to_string()))
    }

    async fn delete_by_key(&self, _: EntityKey) -> FeedResult<usize> {
        Err(FeedError::Store("connection refused".to_string()))
    }
}

/// Flags flipped by a [`SlowStore`] query as it progresses
#[derive(Default)]
pub struct QueryTracker {
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
    pub dropped: AtomicUsize,
}

impl QueryTracker {
    /// Queries that were dropped before they finished
    pub fn cancelled(&self) -> usize {
        self.dropped.load(Ordering::SeqCst) - self.completed.load(Ordering::SeqCst)
    }
}

struct DropGuard(Arc<QueryTracker>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// A shard that stalls for `delay` before answering from `inner`
pub struct SlowStore {
    pub inner: MemoryShardStore,
    pub delay: Duration,
    pub tracker: Arc<QueryTracker>,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryShardStore::new(),
            delay,
            tracker: Arc::new(QueryTracker::default()),
        }
    }
}

#[async_trait]
impl ShardStore for SlowStore {
    async fn query(
        &self,
        keys: &[EntityKey],
        cutoff: Option<DateTime<Utc>>,
        limit: usize,
    ) -> FeedResult<Vec<Record>> {
        let _guard = DropGuard(self.tracker.clone());
        self.tracker.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.tracker.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.query(keys, cutoff, limit).await
    }

    async fn insert(&self, records: Vec<Record>) -> FeedResult<usize> {
        self.inner.insert(records).await
    }

    async fn delete_by_key(&self, key: EntityKey) -> FeedResult<usize> {
        self.inner.delete_by_key(key).await
    }
}

/// A shard whose writes can be switched to fail, to simulate a crash mid-migration
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryShardStore,
    pub fail_insert: Arc<AtomicBool>,
    pub fail_delete: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryShardStore) -> Self {
        Self {
            inner,
            fail_insert: Arc::new(AtomicBool::new(false)),
            fail_delete: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ShardStore for FlakyStore {
    async fn query(
        &self,
        keys: &[EntityKey],
        cutoff: Option<DateTime<Utc>>,
        limit: usize,
    ) -> FeedResult<Vec<Record>> {
        self.inner.query(keys, cutoff, limit).await
    }

    async fn insert(&self, records: Vec<Record>) -> FeedResult<usize> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(FeedError::Store("insert rejected".to_string()));
        }
        self.inner.insert(records).await
    }

    async fn delete_by_key(&self, key: EntityKey) -> FeedResult<usize> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(FeedError::Store("delete rejected".to_string()));
        }
        self.inner.delete_by_key(key).await
    }
}
