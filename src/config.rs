use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};
use crate::sharding::modulo::MODULO_SHARDS;

/// How the global limit is split into per-shard sub-query caps
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FanOutPolicy {
    #[default]
    /// `ceil(limit / active_shards)` per shard. Cheap, but only an approximation
    /// of the global top-`limit` when data is skewed towards one shard.
    Divided,
    /// Every shard returns up to `limit` rows, so the merged top-`limit` is exact.
    Exact,
    /// Divided cap multiplied by `factor`, never above `limit`.
    Padded { factor: usize },
}

impl FanOutPolicy {
    /// Per-shard cap for a request of `limit` rows spread over `active` shards
    pub fn per_shard_limit(&self, limit: usize, active: usize) -> usize {
        if active <= 1 {
            return limit;
        }
        let divided = limit.div_ceil(active);
        match self {
            FanOutPolicy::Divided => divided,
            FanOutPolicy::Exact => limit,
            FanOutPolicy::Padded { factor } => divided.saturating_mul((*factor).max(1)).min(limit),
        }
    }
}

/// Parses `divided`, `exact`, or `padded:<factor>`
impl std::str::FromStr for FanOutPolicy {
    type Err = FeedError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        match raw {
            "divided" => return Ok(FanOutPolicy::Divided),
            "exact" => return Ok(FanOutPolicy::Exact),
            _ => {}
        }
        let factor = raw
            .strip_prefix("padded:")
            .and_then(|f| f.trim().parse::<usize>().ok())
            .filter(|&f| f > 0)
            .ok_or_else(|| {
                FeedError::Config(format!(
                    "fan-out must be 'divided', 'exact' or 'padded:<factor>', got '{}'",
                    raw
                ))
            })?;
        Ok(FanOutPolicy::Padded { factor })
    }
}

/// Router and topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Virtual nodes per shard on the hash ring
    pub replicas: usize,

    /// Number of shards in the initial topology
    pub shard_count: usize,

    /// Fixed shard count of the modulo baseline router
    pub modulo_shards: usize,

    pub fan_out: FanOutPolicy,

    /// Per-request deadline for the whole fan-out (none = wait for all shards)
    pub request_timeout_ms: Option<u64>,

    pub default_limit: usize,

    /// Rolling time window applied when a query carries no explicit cutoff
    pub cutoff_days: Option<u32>,
}

pub const DEFAULT_REPLICAS: usize = 200;

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            shard_count: 3,
            modulo_shards: MODULO_SHARDS,
            fan_out: FanOutPolicy::Divided,
            request_timeout_ms: None,
            default_limit: 50,
            cutoff_days: None,
        }
    }
}

impl FeedConfig {
    pub fn from_toml_str(raw: &str) -> FeedResult<Self> {
        let config: FeedConfig =
            toml::from_str(raw).map_err(|e| FeedError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> FeedResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&raw)
    }

    /// Override fields from `FEEDSHARD_*` environment variables
    pub fn apply_env(&mut self) -> FeedResult<()> {
        if let Some(v) = env_parse::<usize>("FEEDSHARD_REPLICAS")? {
            self.replicas = v;
        }
        if let Some(v) = env_parse::<usize>("FEEDSHARD_SHARDS")? {
            self.shard_count = v;
        }
        if let Some(v) = env_parse::<usize>("FEEDSHARD_MODULO_SHARDS")? {
            self.modulo_shards = v;
        }
        if let Some(v) = env_parse::<u64>("FEEDSHARD_TIMEOUT_MS")? {
            self.request_timeout_ms = Some(v);
        }
        if let Some(v) = env_parse::<u32>("FEEDSHARD_CUTOFF_DAYS")? {
            self.cutoff_days = Some(v);
        }
        if let Ok(mode) = std::env::var("FEEDSHARD_FAN_OUT") {
            self.fan_out = mode.parse()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.replicas == 0 {
            return Err(FeedError::InvalidReplicas(0));
        }
        if self.shard_count == 0 {
            return Err(FeedError::Config("shard_count must be at least 1".to_string()));
        }
        if self.modulo_shards == 0 {
            return Err(FeedError::Config("modulo_shards must be at least 1".to_string()));
        }
        if let FanOutPolicy::Padded { factor: 0 } = self.fan_out {
            return Err(FeedError::Config("padded fan-out factor must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Shard ids of the initial topology
    pub fn shard_ids(&self) -> Vec<usize> {
        (0..self.shard_count).collect()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> FeedResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| FeedError::Config(format!("{} has an invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
