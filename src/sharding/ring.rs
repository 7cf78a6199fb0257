//! Consistent hashing ring with virtual nodes
//!
//! Every shard is placed on a 64-bit continuum `replicas` times. A ring key is
//! owned by the first point at or after it, wrapping to the first point past the
//! end. Adding a shard to `N` only moves about `1/(N+1)` of the keys.
//!
//! A ring is immutable once built. Topology changes build a new ring and swap
//! it in through [`super::topology::RingHandle`].

use std::collections::BTreeMap;

use serde::Serialize;

use super::hasher::{mix64, point_seed};
use crate::error::{FeedError, FeedResult};
use crate::model::ShardId;

/// One virtual node on the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VirtualPoint {
    pub position: u64,
    pub owner: ShardId,
}

#[derive(Debug, Clone)]
pub struct HashRing {
    // ascending by position
    points: Vec<VirtualPoint>,
    shards: Vec<ShardId>,
    replicas: usize,
}

impl HashRing {
    /// Build the ring for `shards` with `replicas` virtual nodes each.
    ///
    /// Deterministic: the same shard set and replica count always produce the
    /// same ring. An empty shard set yields an empty ring whose lookups fail.
    pub fn build(shards: &[ShardId], replicas: usize) -> FeedResult<Self> {
        if replicas == 0 {
            return Err(FeedError::InvalidReplicas(replicas));
        }

        let mut shards = shards.to_vec();
        shards.sort_unstable();
        shards.dedup();

        let mut points = Vec::with_capacity(shards.len() * replicas);
        for &shard in &shards {
            for replica in 0..replicas {
                points.push(VirtualPoint {
                    position: mix64(point_seed(shard, replica)),
                    owner: shard,
                });
            }
        }
        // Stable sort keeps build order among equal positions, so the later
        // point wins a shared position.
        points.sort_by_key(|p| p.position);
        points.dedup_by(|later, kept| {
            if later.position == kept.position {
                kept.owner = later.owner;
                true
            } else {
                false
            }
        });

        tracing::debug!(
            "Built hash ring: {} shards x {} replicas = {} points",
            shards.len(),
            replicas,
            points.len()
        );

        Ok(Self {
            points,
            shards,
            replicas,
        })
    }

    /// Shard owning `ring_key`. Fails with [`FeedError::EmptyRing`] rather than
    /// guessing when the ring has no points.
    pub fn owner(&self, ring_key: u64) -> FeedResult<ShardId> {
        if self.points.is_empty() {
            return Err(FeedError::EmptyRing);
        }
        let idx = self.points.partition_point(|p| p.position < ring_key);
        let idx = if idx == self.points.len() { 0 } else { idx };
        Ok(self.points[idx].owner)
    }

    pub fn points(&self) -> &[VirtualPoint] {
        &self.points
    }

    /// Distinct shards on the ring, ascending
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fraction of the 64-bit key space owned by each shard
    pub fn ownership_share(&self) -> BTreeMap<ShardId, f64> {
        let mut share: BTreeMap<ShardId, f64> = self.shards.iter().map(|&s| (s, 0.0)).collect();
        match self.points.len() {
            0 => return share,
            1 => {
                share.insert(self.points[0].owner, 1.0);
                return share;
            }
            _ => {}
        }

        let space = 2f64.powi(64);
        let last = self.points[self.points.len() - 1].position;
        let mut prev = last;
        for point in &self.points {
            // Arc (prev, position] belongs to this point; the first arc wraps
            let arc = point.position.wrapping_sub(prev);
            *share.entry(point.owner).or_insert(0.0) += arc as f64 / space;
            prev = point.position;
        }
        share
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::hasher::hash_key;

    #[test]
    fn test_build_point_count() {
        for (shards, replicas) in [(vec![0], 1), (vec![0, 1, 2], 200), (vec![0, 1, 2, 3, 4], 17)] {
            let ring = HashRing::build(&shards, replicas).unwrap();
            assert_eq!(ring.len(), shards.len() * replicas);
            for &s in &shards {
                let owned = ring.points().iter().filter(|p| p.owner == s).count();
                assert_eq!(owned, replicas);
            }
        }
    }

    #[test]
    fn test_points_sorted_ascending() {
        let ring = HashRing::build(&[0, 1, 2], 200).unwrap();
        assert!(ring.points().windows(2).all(|w| w[0].position < w[1].position));
    }

    #[test]
    fn test_zero_replicas_rejected() {
        assert!(matches!(
            HashRing::build(&[0, 1], 0),
            Err(FeedError::InvalidReplicas(0))
        ));
    }

    #[test]
    fn test_empty_ring_fails_closed() {
        let ring = HashRing::build(&[], 200).unwrap();
        assert!(ring.is_empty());
        assert!(matches!(ring.owner(12345), Err(FeedError::EmptyRing)));
    }

    #[test]
    fn test_owner_around_every_point() {
        let ring = HashRing::build(&[0, 1, 2], 50).unwrap();
        let points = ring.points();
        for (i, p) in points.iter().enumerate() {
            // Exactly on the point: that point owns it
            assert_eq!(ring.owner(p.position).unwrap(), p.owner);
            // Just below: still the same point
            if p.position > 0 {
                assert_eq!(ring.owner(p.position - 1).unwrap(), p.owner);
            }
            // Just above: the next point, or the first one on wrap-around
            let next = points.get(i + 1).unwrap_or(&points[0]);
            if p.position < u64::MAX {
                assert_eq!(ring.owner(p.position + 1).unwrap(), next.owner);
            }
        }
        assert_eq!(ring.owner(u64::MAX).unwrap(), points[0].owner);
        assert_eq!(ring.owner(0).unwrap(), points[0].owner);
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let ring = HashRing::build(&[2], 3).unwrap();
        for key in -500..500 {
            assert_eq!(ring.owner(hash_key(key)).unwrap(), 2);
        }
        assert_eq!(ring.ownership_share()[&2], 1.0);
    }

    #[test]
    fn test_deterministic_build() {
        let a = HashRing::build(&[0, 1, 2], 200).unwrap();
        let b = HashRing::build(&[2, 1, 0], 200).unwrap();
        assert_eq!(a.points(), b.points());
        for key in 0..1000 {
            assert_eq!(a.owner(hash_key(key)).unwrap(), b.owner(hash_key(key)).unwrap());
        }
    }

    #[test]
    fn test_key_42_resolves_to_first_point_at_or_after_hash() {
        let ring = HashRing::build(&[0, 1, 2], 200).unwrap();
        let h = hash_key(42);
        let expected = ring
            .points()
            .iter()
            .find(|p| p.position >= h)
            .unwrap_or(&ring.points()[0])
            .owner;
        assert_eq!(ring.owner(h).unwrap(), expected);
    }

    #[test]
    fn test_ownership_share_sums_to_one() {
        let ring = HashRing::build(&[0, 1, 2], 200).unwrap();
        let share = ring.ownership_share();
        let total: f64 = share.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        for (shard, s) in share {
            assert!(s > 0.2 && s < 0.5, "shard {} owns {}", shard, s);
        }
    }
}
