//! Consistent-hash sharding: key placement, feed routing, and rebalancing

pub mod fanout;
pub mod hasher;
pub mod migration;
pub mod modulo;
pub mod ring;
pub mod router;
pub mod topology;

pub use hasher::hash_key;
pub use migration::{estimate_moved_ratio, KeyMove, MigrationPlan, MigrationReport, Migrator};
pub use modulo::{modulo_owner, ModuloRouter};
pub use ring::{HashRing, VirtualPoint};
pub use router::{ConsistentHashRouter, FeedRouter};
pub use topology::{RingHandle, RingSnapshot};
