pub mod config;
pub mod error;
pub mod model;
pub mod sharding;
pub mod storage;

pub use config::{FanOutPolicy, FeedConfig};
pub use error::{FeedError, FeedResult, MigrationError, MigrationPhase};
pub use model::{EntityKey, FeedQuery, Record, ShardId};
pub use sharding::{
    ConsistentHashRouter, FeedRouter, HashRing, Migrator, ModuloRouter, RingHandle,
};
pub use storage::{MemoryShardStore, ShardStore};
