//! Concurrent fan-out and merge shared by the feed routers
//!
//! One task per active shard is spawned into a [`JoinSet`], which doubles as
//! the rejoin barrier. The first failing shard aborts the request: the set is
//! aborted and dropped so no sub-query keeps running in the background. A
//! caller dropping the request future has the same effect.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::config::FanOutPolicy;
use crate::error::{FeedError, FeedResult};
use crate::model::{feed_order, EntityKey, Record, ShardId};
use crate::storage::ShardStore;

/// Keys grouped by owning shard. Only shards with at least one key appear.
pub type ShardGroups = BTreeMap<ShardId, Vec<EntityKey>>;

/// Everything one fan-out needs besides the shard groups
#[derive(Debug, Clone, Copy)]
pub struct FanOutRequest {
    pub limit: usize,
    pub cutoff: Option<DateTime<Utc>>,
    pub policy: FanOutPolicy,
    pub timeout: Option<Duration>,
}

/// Run one sub-query per group concurrently and merge the results into the
/// global feed order, truncated to `limit`.
pub async fn fan_out(
    stores: &[Arc<dyn ShardStore>],
    groups: ShardGroups,
    request: FanOutRequest,
) -> FeedResult<Vec<Record>> {
    for &shard in groups.keys() {
        if shard >= stores.len() {
            return Err(FeedError::ShardOutOfRange {
                shard,
                configured: stores.len(),
            });
        }
    }
    if request.limit == 0 || groups.is_empty() {
        return Ok(Vec::new());
    }

    let per_shard = request.policy.per_shard_limit(request.limit, groups.len());
    tracing::debug!(
        "Fan-out to {} shards, limit {} ({} per shard)",
        groups.len(),
        request.limit,
        per_shard
    );

    let mut tasks = JoinSet::new();
    for (shard, keys) in groups {
        let store = Arc::clone(&stores[shard]);
        let cutoff = request.cutoff;
        tasks.spawn(async move {
            let result = store
                .query(&keys, cutoff, per_shard)
                .await
                .map_err(|e| e.on_shard(shard));
            (shard, result)
        });
    }

    let collected = match request.timeout {
        Some(deadline) => tokio::time::timeout(deadline, collect(&mut tasks)).await.ok(),
        None => Some(collect(&mut tasks).await),
    };
    let parts = match collected {
        Some(parts) => parts?,
        None => {
            tasks.abort_all();
            let deadline = request.timeout.unwrap_or_default();
            tracing::warn!("Fan-out timed out after {:?}, aborted {} shard tasks", deadline, tasks.len());
            return Err(FeedError::Timeout(deadline));
        }
    };

    Ok(merge_feeds(parts, request.limit))
}

async fn collect(
    tasks: &mut JoinSet<(ShardId, FeedResult<Vec<Record>>)>,
) -> FeedResult<Vec<Vec<Record>>> {
    let mut parts = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(records))) => parts.push(records),
            Ok((shard, Err(e))) => {
                tracing::warn!("Shard {} failed, aborting {} in-flight sub-queries: {}", shard, tasks.len(), e);
                tasks.abort_all();
                return Err(e);
            }
            Err(join_err) => {
                tasks.abort_all();
                return Err(FeedError::TaskFailed(join_err.to_string()));
            }
        }
    }
    Ok(parts)
}

struct Head {
    record: Record,
    part: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // Max-heap: the record that comes first in the feed is the greatest
    fn cmp(&self, other: &Self) -> Ordering {
        feed_order(&other.record, &self.record).then_with(|| other.part.cmp(&self.part))
    }
}

/// K-way merge of per-shard feeds, each already in feed order
pub fn merge_feeds(parts: Vec<Vec<Record>>, limit: usize) -> Vec<Record> {
    let mut iters: Vec<std::vec::IntoIter<Record>> = parts.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (part, iter) in iters.iter_mut().enumerate() {
        if let Some(record) = iter.next() {
            heap.push(Head { record, part });
        }
    }

    let mut merged = Vec::new();
    while merged.len() < limit {
        let Some(Head { record, part }) = heap.pop() else {
            break;
        };
        if let Some(next) = iters[part].next() {
            debug_assert!(feed_order(&record, &next) != Ordering::Greater, "shard feed out of order");
            heap.push(Head { record: next, part });
        }
        merged.push(record);
    }
    merged
}
