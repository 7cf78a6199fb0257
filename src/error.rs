use std::time::Duration;

use thiserror::Error;

use crate::model::{EntityKey, ShardId};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Router not initialized: {0}")]
    NotInitialized(String),

    #[error("Hash ring is empty")]
    EmptyRing,

    #[error("Invalid replica factor: {0}")]
    InvalidReplicas(usize),

    #[error("Shard {shard} is out of range ({configured} shard connections configured)")]
    ShardOutOfRange { shard: ShardId, configured: usize },

    #[error("Shard {shard} query failed: {source}")]
    ShardQuery {
        shard: ShardId,
        #[source]
        source: Box<FeedError>,
    },

    #[error("Feed request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Shard task failed: {0}")]
    TaskFailed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    /// Wrap a store-level failure with the identity of the shard that raised it
    pub fn on_shard(self, shard: ShardId) -> Self {
        match self {
            // Already carries shard context
            FeedError::ShardQuery { .. } => self,
            other => FeedError::ShardQuery {
                shard,
                source: Box::new(other),
            },
        }
    }

    /// Shard identity attached to this error, if any
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            FeedError::ShardQuery { shard, .. }
            | FeedError::ShardOutOfRange { shard, .. } => Some(*shard),
            _ => None,
        }
    }

    /// Configuration failures are fatal to the request and never worth retrying
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FeedError::NotInitialized(_)
                | FeedError::EmptyRing
                | FeedError::InvalidReplicas(_)
                | FeedError::ShardOutOfRange { .. }
                | FeedError::Config(_)
        )
    }
}

impl serde::Serialize for FeedError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Step of a key relocation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Reading the key's records from the old owner
    Read,
    /// Append-only copy onto the new owner
    Copy,
    /// Removal from the old owner, only attempted after a successful copy
    Delete,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MigrationPhase::Read => "read",
            MigrationPhase::Copy => "copy",
            MigrationPhase::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MigrationError {
    /// The rings cannot be migrated between; nothing was touched
    #[error("Cannot migrate: {0}")]
    Topology(FeedError),

    /// A single key failed. Carries enough context to re-run safely.
    #[error("Migration of key {key} from shard {from} to shard {to} failed during {phase}: {source}")]
    Key {
        key: EntityKey,
        from: ShardId,
        to: ShardId,
        phase: MigrationPhase,
        #[source]
        source: FeedError,
    },
}

impl MigrationError {
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationError::Key { phase, .. } => Some(*phase),
            MigrationError::Topology(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_shard_wraps_once() {
        let err = FeedError::Store("connection reset".to_string()).on_shard(2);
        assert_eq!(err.shard(), Some(2));

        let rewrapped = err.on_shard(5);
        assert_eq!(rewrapped.shard(), Some(2));
        assert_eq!(
            rewrapped.to_string(),
            "Shard 2 query failed: Store error: connection reset"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(FeedError::EmptyRing.is_configuration());
        assert!(FeedError::ShardOutOfRange { shard: 4, configured: 3 }.is_configuration());
        assert!(!FeedError::Store("x".into()).is_configuration());
        assert!(!FeedError::Timeout(Duration::from_millis(5)).is_configuration());
    }

    #[test]
    fn test_migration_error_message() {
        let err = MigrationError::Key {
            key: 42,
            from: 1,
            to: 3,
            phase: MigrationPhase::Delete,
            source: FeedError::Store("disk full".into()),
        };
        assert_eq!(
            err.to_string(),
            "Migration of key 42 from shard 1 to shard 3 failed during delete: Store error: disk full"
        );
        assert_eq!(err.phase(), Some(MigrationPhase::Delete));
        assert_eq!(MigrationError::Topology(FeedError::EmptyRing).phase(), None);
    }
}
