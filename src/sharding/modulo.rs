//! Fixed-modulo feed router
//!
//! Ownership is `key mod N` for a shard count fixed at construction. It shares
//! the fan-out and merge path with the ring router and exists as a baseline:
//!
//! - Changing `N` remaps most keys, so a resize means moving most of the data.
//! - There is no indirection layer to remap a subset of keys.
//! - No virtual buckets to smooth skew; a hot key overloads its shard.
//!
//! It intentionally has no migration support.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::fanout::{fan_out, FanOutRequest, ShardGroups};
use super::router::FeedRouter;
use crate::config::{FanOutPolicy, FeedConfig};
use crate::error::{FeedError, FeedResult};
use crate::model::{EntityKey, FeedQuery, Record, ShardId};
use crate::storage::ShardStore;

/// Shard count the baseline is wired for
pub const MODULO_SHARDS: usize = 3;

/// Owner of `key` among `shard_count` shards. Negative keys wrap to a valid index.
pub fn modulo_owner(key: EntityKey, shard_count: usize) -> ShardId {
    key.rem_euclid(shard_count as i64) as ShardId
}

/// Fraction of `keys` whose modulo owner differs between two shard counts
pub fn modulo_moved_ratio<I>(keys: I, old_count: usize, new_count: usize) -> f64
where
    I: IntoIterator<Item = EntityKey>,
{
    let mut total = 0usize;
    let mut moved = 0usize;
    for key in keys {
        total += 1;
        if modulo_owner(key, old_count) != modulo_owner(key, new_count) {
            moved += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        moved as f64 / total as f64
    }
}

#[derive(Clone)]
pub struct ModuloRouter {
    stores: Vec<Arc<dyn ShardStore>>,
    shard_count: usize,
    policy: FanOutPolicy,
    timeout: Option<Duration>,
    window_days: Option<u32>,
}

impl ModuloRouter {
    /// Router over `stores`, which must hold exactly `shard_count` shards
    pub fn new(stores: Vec<Arc<dyn ShardStore>>, shard_count: usize) -> Self {
        Self {
            stores,
            shard_count,
            policy: FanOutPolicy::Divided,
            timeout: None,
            window_days: None,
        }
    }

    pub fn from_config(config: &FeedConfig, stores: Vec<Arc<dyn ShardStore>>) -> Self {
        Self::new(stores, config.modulo_shards)
            .with_policy(config.fan_out)
            .with_timeout(config.request_timeout())
            .with_window_days(config.cutoff_days)
    }

    pub fn with_policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default cutoff for queries that carry none
    pub fn with_window_days(mut self, days: Option<u32>) -> Self {
        self.window_days = days;
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    fn check(&self) -> FeedResult<()> {
        if self.shard_count == 0 {
            return Err(FeedError::NotInitialized("modulo shard count is zero".to_string()));
        }
        if self.stores.len() != self.shard_count {
            return Err(FeedError::Config(format!(
                "expected {} shards, got {}",
                self.shard_count,
                self.stores.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedRouter for ModuloRouter {
    async fn get_feed(&self, query: &FeedQuery) -> FeedResult<Vec<Record>> {
        self.check()?;

        let mut groups = ShardGroups::new();
        for &key in &query.keys {
            groups
                .entry(modulo_owner(key, self.shard_count))
                .or_default()
                .push(key);
        }

        fan_out(
            &self.stores,
            groups,
            FanOutRequest {
                limit: query.limit,
                cutoff: query.effective_cutoff(self.window_days),
                policy: self.policy,
                timeout: query.timeout.or(self.timeout),
            },
        )
        .await
    }

    fn name(&self) -> &'static str {
        "hash-modulo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryShardStore;

    #[test]
    fn test_modulo_owner() {
        assert_eq!(modulo_owner(0, 3), 0);
        assert_eq!(modulo_owner(7, 3), 1);
        assert_eq!(modulo_owner(-1, 3), 2);
        assert_eq!(modulo_owner(i64::MIN, 3), 1);
    }

    #[test]
    fn test_resize_moves_most_keys() {
        let ratio = modulo_moved_ratio(1..=10_000, 3, 4);
        assert!(ratio > 0.7, "only {} of keys moved", ratio);
        assert_eq!(modulo_moved_ratio(std::iter::empty(), 3, 4), 0.0);
    }

    #[tokio::test]
    async fn test_store_count_mismatch() {
        let stores: Vec<Arc<dyn ShardStore>> = vec![Arc::new(MemoryShardStore::new())];
        let router = ModuloRouter::new(stores, MODULO_SHARDS);
        let err = router.get_feed(&FeedQuery::new([1, 2, 3], 5)).await.unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: expected 3 shards, got 1");
    }
}
