//! Current-ring reference shared by live readers
//!
//! Rings are never mutated; a rebalance publishes a whole new generation. The
//! lock only guards the pointer, so readers hold it for the length of an `Arc`
//! clone and then work against one consistent generation for the whole request.

use std::sync::Arc;

use parking_lot::RwLock;

use super::ring::HashRing;

/// One published ring generation
#[derive(Debug)]
pub struct RingSnapshot {
    pub version: u64,
    pub ring: HashRing,
}

#[derive(Clone)]
pub struct RingHandle {
    current: Arc<RwLock<Arc<RingSnapshot>>>,
}

impl RingHandle {
    pub fn new(ring: HashRing) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(RingSnapshot { version: 1, ring }))),
        }
    }

    /// The generation in effect right now
    pub fn load(&self) -> Arc<RingSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Publish `ring` as the next generation and return its version
    pub fn swap(&self, ring: HashRing) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        tracing::info!(
            "Swapping hash ring v{} -> v{} ({} shards, {} points)",
            current.version,
            version,
            ring.shards().len(),
            ring.len()
        );
        *current = Arc::new(RingSnapshot { version, ring });
        version
    }

    /// Publish `ring` only if the current generation is still `expected`.
    /// Returns the new version, or the version that won the race.
    pub fn compare_and_swap(&self, expected: u64, ring: HashRing) -> Result<u64, u64> {
        let mut current = self.current.write();
        if current.version != expected {
            return Err(current.version);
        }
        let version = current.version + 1;
        *current = Arc::new(RingSnapshot { version, ring });
        Ok(version)
    }
}
