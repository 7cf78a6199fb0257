//! Feed routing over the consistent hashing ring

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::fanout::{fan_out, FanOutRequest, ShardGroups};
use super::hasher::hash_key;
use super::ring::HashRing;
use super::topology::RingHandle;
use crate::config::{FanOutPolicy, FeedConfig};
use crate::error::{FeedError, FeedResult};
use crate::model::{EntityKey, FeedQuery, Record, ShardId};
use crate::storage::ShardStore;

/// Read path consumed by callers that want a merged feed
#[async_trait]
pub trait FeedRouter: Send + Sync {
    /// Newest-first records for `query.keys`, at most `query.limit` of them
    async fn get_feed(&self, query: &FeedQuery) -> FeedResult<Vec<Record>>;

    /// Short label for logs and benchmark output
    fn name(&self) -> &'static str;
}

/// Routes each key to the shard owning its ring position, fans out one
/// sub-query per active shard, and merges the partial feeds.
///
/// With [`FanOutPolicy::Divided`] every shard is capped at
/// `ceil(limit / active_shards)`. When one shard holds most of the newest
/// records the merged result is a best-effort approximation of the global
/// top-`limit`; use [`FanOutPolicy::Exact`] when that matters.
#[derive(Clone, Default)]
pub struct ConsistentHashRouter {
    stores: Vec<Arc<dyn ShardStore>>,
    ring: Option<RingHandle>,
    policy: FanOutPolicy,
    timeout: Option<Duration>,
    window_days: Option<u32>,
}

impl ConsistentHashRouter {
    pub fn new(stores: Vec<Arc<dyn ShardStore>>, ring: RingHandle) -> Self {
        Self {
            stores,
            ring: Some(ring),
            ..Self::default()
        }
    }

    /// Build the ring described by `config` over `stores`
    pub fn from_config(config: &FeedConfig, stores: Vec<Arc<dyn ShardStore>>) -> FeedResult<Self> {
        config.validate()?;
        let ring = HashRing::build(&config.shard_ids(), config.replicas)?;
        Ok(Self::new(stores, RingHandle::new(ring))
            .with_policy(config.fan_out)
            .with_timeout(config.request_timeout())
            .with_window_days(config.cutoff_days))
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

    /// Handle through which a rebalance publishes the next ring
    pub fn ring_handle(&self) -> Option<&RingHandle> {
        self.ring.as_ref()
    }

    pub fn stores(&self) -> &[Arc<dyn ShardStore>] {
        &self.stores
    }

    fn handle(&self) -> FeedResult<&RingHandle> {
        if self.stores.is_empty() {
            return Err(FeedError::NotInitialized("no shard stores configured".to_string()));
        }
        self.ring
            .as_ref()
            .ok_or_else(|| FeedError::NotInitialized("no hash ring configured".to_string()))
    }

    /// Shard currently owning `key`
    pub fn route(&self, key: EntityKey) -> FeedResult<ShardId> {
        self.handle()?.load().ring.owner(hash_key(key))
    }

    /// Group keys by their owner on `ring`
    pub fn partition<'a, I>(ring: &HashRing, keys: I) -> FeedResult<ShardGroups>
    where
        I: IntoIterator<Item = &'a EntityKey>,
    {
        let mut groups = ShardGroups::new();
        for &key in keys {
            let owner = ring.owner(hash_key(key))?;
            groups.entry(owner).or_default().push(key);
        }
        Ok(groups)
    }
}

#[async_trait]
impl FeedRouter for ConsistentHashRouter {
    async fn get_feed(&self, query: &FeedQuery) -> FeedResult<Vec<Record>> {
        // One generation for the whole request, even if a swap lands mid-flight
        let snapshot = self.handle()?.load();
        let groups = Self::partition(&snapshot.ring, &query.keys)?;

        tracing::debug!(
            "Routing {} keys over ring v{} to {} shards",
            query.keys.len(),
            snapshot.version,
            groups.len()
        );

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
        "hash-consistent"
    }
}
