//! Feed domain types shared by the ring, routers, stores, and migrator

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque 64-bit user identifier that owns feed records
pub type EntityKey = i64;

/// Index of one physical partition; the active set is `0..shard_count`
pub type ShardId = usize;

/// An immutable unit of feed data, addressable by `(user_id, created_at)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub user_id: EntityKey,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

impl Record {
    pub fn new(id: i64, user_id: EntityKey, created_at: DateTime<Utc>, content: impl Into<String>) -> Self {
        Self {
            id,
            user_id,
            created_at,
            content: content.into(),
        }
    }
}

/// Feed order: newest first, ties broken by descending record id so merges are reproducible
pub fn feed_order(a: &Record, b: &Record) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort records into feed order in place
pub fn sort_feed(records: &mut [Record]) {
    records.sort_by(feed_order);
}

/// A read request for the merged feed of a set of users
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub keys: BTreeSet<EntityKey>,
    pub limit: usize,
    pub cutoff: Option<DateTime<Utc>>,
    /// Overrides the router's configured request timeout
    pub timeout: Option<Duration>,
}

impl FeedQuery {
    pub fn new<I>(keys: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = EntityKey>,
    {
        Self {
            keys: keys.into_iter().collect(),
            limit,
            cutoff: None,
            timeout: None,
        }
    }

    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    /// Only keep records newer than `days` before now
    pub fn with_window(self, days: u32) -> Self {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.with_cutoff(cutoff)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Explicit cutoff if set, else `window_days` before now
    pub fn effective_cutoff(&self, window_days: Option<u32>) -> Option<DateTime<Utc>> {
        self.cutoff.or_else(|| {
            window_days.map(|days| Utc::now() - chrono::Duration::days(i64::from(days)))
        })
    }

    /// Whether a record passes this query's time filter
    pub fn admits(&self, record: &Record) -> bool {
        self.cutoff.map_or(true, |c| record.created_at >= c)
    }
}
