//! In-memory shard store
//!
//! Keeps each key's records sorted newest first so range-filtered lookups are a
//! prefix scan per key followed by a k-way merge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::ShardStore;
use crate::error::FeedResult;
use crate::model::{feed_order, sort_feed, EntityKey, Record};

#[derive(Clone, Default)]
pub struct MemoryShardStore {
    // user_id -> records in feed order
    rows: Arc<RwLock<HashMap<EntityKey, Vec<Record>>>>,
    /// Simulated network latency applied before every query
    latency: Option<Duration>,
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total number of records held
    pub fn len(&self) -> usize {
        self.rows.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records held for one key
    pub fn count_for(&self, key: EntityKey) -> usize {
        self.rows.read().get(&key).map(Vec::len).unwrap_or(0)
    }

    /// Keys with at least one record on this shard, ascending
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self
            .rows
            .read()
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn query(
        &self,
        keys: &[EntityKey],
        cutoff: Option<DateTime<Utc>>,
        limit: usize,
    ) -> FeedResult<Vec<Record>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        {
            let rows = self.rows.read();
            for key in keys {
                if let Some(records) = rows.get(key) {
                    out.extend(
                        records
                            .iter()
                            .take_while(|r| cutoff.map_or(true, |c| r.created_at >= c))
                            .take(limit)
                            .cloned(),
                    );
                }
            }
        }

        sort_feed(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    async fn insert(&self, records: Vec<Record>) -> FeedResult<usize> {
        let mut rows = self.rows.write();
        let mut written = 0usize;
        for record in records {
            let entry = rows.entry(record.user_id).or_default();
            // Keyed by record id so a re-run copy does not duplicate rows
            if entry.iter().any(|r| r.id == record.id) {
                continue;
            }
            let pos = entry
                .binary_search_by(|existing| feed_order(existing, &record))
                .unwrap_or_else(|p| p);
            entry.insert(pos, record);
            written += 1;
        }
        Ok(written)
    }

    async fn delete_by_key(&self, key: EntityKey) -> FeedResult<usize> {
        Ok(self.rows.write().remove(&key).map(|r| r.len()).unwrap_or(0))
    }
}
