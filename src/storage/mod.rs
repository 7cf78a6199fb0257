//! Per-shard storage boundary
//!
//! The routers and the migrator only depend on the [`ShardStore`] semantics:
//! range-filtered lookups returned newest first, append-only batch inserts, and
//! idempotent per-key deletes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FeedResult;
use crate::model::{EntityKey, Record};

pub use memory::MemoryShardStore;

/// One physical partition of the feed data
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Records owned by any of `keys`, with `created_at >= cutoff` when a cutoff
    /// is given, newest first, at most `limit` rows.
    async fn query(
        &self,
        keys: &[EntityKey],
        cutoff: Option<DateTime<Utc>>,
        limit: usize,
    ) -> FeedResult<Vec<Record>>;

    /// Append records. Returns the number of rows written.
    async fn insert(&self, records: Vec<Record>) -> FeedResult<usize>;

    /// Remove every record of `key`. Deleting an absent key is a no-op returning 0.
    async fn delete_by_key(&self, key: EntityKey) -> FeedResult<usize>;

    /// Every record of a single key, newest first
    async fn records_for(&self, key: EntityKey) -> FeedResult<Vec<Record>> {
        self.query(&[key], None, usize::MAX).await
    }
}
