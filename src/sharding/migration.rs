//! Shard ownership migration between ring generations
//!
//! For every key whose owner differs between the old and new ring:
//! 1. Read the key's records from the old owner.
//! 2. Insert them on the new owner (append-only, keyed by record id).
//! 3. Only after the insert succeeded, delete the key from the old owner.
//!
//! Insert-before-delete never loses a record. A crash between 2 and 3 leaves the
//! key on both shards until the migration is re-run; re-running is safe because
//! the copy is keyed and deleting an absent key is a no-op. Readers during a
//! migration may see a key on its old shard, its new shard, or both.

use std::sync::Arc;

use serde::Serialize;

use super::hasher::hash_key;
use super::ring::HashRing;
use super::topology::RingHandle;
use crate::error::{FeedError, FeedResult, MigrationError, MigrationPhase};
use crate::model::{EntityKey, ShardId};
use crate::storage::ShardStore;

/// A key whose owner changes between two ring generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyMove {
    pub key: EntityKey,
    pub from: ShardId,
    pub to: ShardId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationPlan {
    pub scanned: usize,
    pub moves: Vec<KeyMove>,
}

impl MigrationPlan {
    pub fn moved_ratio(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.moves.len() as f64 / self.scanned as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Keys examined
    pub scanned: usize,
    /// Keys whose owner differs between the two rings
    pub owner_changed: usize,
    /// Keys whose records were actually copied or deleted by this run
    pub moved: usize,
    pub records_copied: usize,
    pub records_deleted: usize,
}

/// Keys whose owner differs between `old` and `new`. Pure, performs no I/O.
pub fn plan<I>(old: &HashRing, new: &HashRing, keys: I) -> FeedResult<MigrationPlan>
where
    I: IntoIterator<Item = EntityKey>,
{
    let mut plan = MigrationPlan::default();
    for key in keys {
        plan.scanned += 1;
        let ring_key = hash_key(key);
        let from = old.owner(ring_key)?;
        let to = new.owner(ring_key)?;
        if from != to {
            plan.moves.push(KeyMove { key, from, to });
        }
    }
    Ok(plan)
}

/// Expected fraction of `keys` that a switch from `old` to `new` relocates.
/// Used to size a migration window before running it.
pub fn estimate_moved_ratio<I>(old: &HashRing, new: &HashRing, keys: I) -> FeedResult<f64>
where
    I: IntoIterator<Item = EntityKey>,
{
    Ok(plan(old, new, keys)?.moved_ratio())
}

/// Relocates records between shard stores when the ring changes
#[derive(Clone)]
pub struct Migrator {
    stores: Vec<Arc<dyn ShardStore>>,
}

impl Migrator {
    /// `stores[i]` must be the store of shard `i` in both rings
    pub fn new(stores: Vec<Arc<dyn ShardStore>>) -> Self {
        Self { stores }
    }

    fn check_topology(&self, old: &HashRing, new: &HashRing) -> Result<(), MigrationError> {
        for ring in [old, new] {
            if ring.is_empty() {
                return Err(MigrationError::Topology(FeedError::EmptyRing));
            }
            if let Some(&shard) = ring.shards().iter().find(|&&s| s >= self.stores.len()) {
                return Err(MigrationError::Topology(FeedError::ShardOutOfRange {
                    shard,
                    configured: self.stores.len(),
                }));
            }
        }
        Ok(())
    }

    /// Move every key of `keys` whose owner changes from `old` to `new`.
    ///
    /// Stops at the first failing key. Keys before it are fully migrated, the
    /// failing key is at worst duplicated, and re-running the same call
    /// finishes the job.
    pub async fn migrate<I>(
        &self,
        old: &HashRing,
        new: &HashRing,
        keys: I,
    ) -> Result<MigrationReport, MigrationError>
    where
        I: IntoIterator<Item = EntityKey>,
    {
        self.check_topology(old, new)?;
        let plan = plan(old, new, keys).map_err(MigrationError::Topology)?;

        tracing::info!(
            "MIGRATE: {} of {} keys change owner ({:.2}%)",
            plan.moves.len(),
            plan.scanned,
            plan.moved_ratio() * 100.0
        );

        let mut report = MigrationReport {
            scanned: plan.scanned,
            owner_changed: plan.moves.len(),
            ..MigrationReport::default()
        };
        for mv in &plan.moves {
            let (copied, deleted) = self.move_key(mv).await.inspect_err(|e| {
                tracing::error!("MIGRATE: {}", e);
            })?;
            // Already relocated by an earlier run
            if copied > 0 || deleted > 0 {
                report.moved += 1;
            }
            report.records_copied += copied;
            report.records_deleted += deleted;
        }

        tracing::info!(
            "MIGRATE: relocated {} keys, copied {} records, deleted {} records",
            report.moved,
            report.records_copied,
            report.records_deleted
        );
        Ok(report)
    }

    async fn move_key(&self, mv: &KeyMove) -> Result<(usize, usize), MigrationError> {
        let fail = |phase: MigrationPhase| {
            move |source: FeedError| MigrationError::Key {
                key: mv.key,
                from: mv.from,
                to: mv.to,
                phase,
                source,
            }
        };
        let source = &self.stores[mv.from];
        let target = &self.stores[mv.to];

        let records = source
            .records_for(mv.key)
            .await
            .map_err(fail(MigrationPhase::Read))?;
        let copied = if records.is_empty() {
            0
        } else {
            target
                .insert(records)
                .await
                .map_err(fail(MigrationPhase::Copy))?
        };
        let deleted = source
            .delete_by_key(mv.key)
            .await
            .map_err(fail(MigrationPhase::Delete))?;

        tracing::debug!(
            "MIGRATE: key {} shard {} -> {} ({} copied, {} deleted)",
            mv.key,
            mv.from,
            mv.to,
            copied,
            deleted
        );
        Ok((copied, deleted))
    }

    /// Migrate from the ring currently published on `handle` to `new`, then
    /// publish `new`. Refuses to publish if another swap happened meanwhile.
    pub async fn rebalance<I>(
        &self,
        handle: &RingHandle,
        new: HashRing,
        keys: I,
    ) -> Result<(MigrationReport, u64), MigrationError>
    where
        I: IntoIterator<Item = EntityKey>,
    {
        let current = handle.load();
        let report = self.migrate(&current.ring, &new, keys).await?;
        let version = handle.compare_and_swap(current.version, new).map_err(|won| {
            MigrationError::Topology(FeedError::Config(format!(
                "ring changed during migration (expected v{}, found v{})",
                current.version, won
            )))
        })?;
        Ok((report, version))
    }
}
