use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use feedshard::sharding::{estimate_moved_ratio, hash_key, modulo::modulo_moved_ratio};
use feedshard::{FeedConfig, HashRing, ShardId};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

#[derive(Parser, Debug)]
#[command(name = "feedshard")]
#[command(about = "Consistent-hash sharded feed router", long_about = None)]
struct Args {
    /// TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how the key space is split across shards
    Ring {
        #[arg(long)]
        shards: Option<usize>,

        #[arg(long)]
        replicas: Option<usize>,

        /// Also print the owner of this key
        #[arg(long)]
        key: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// Compare moved-key ratios of ring and modulo placement for a resize
    Moved {
        #[arg(long, default_value_t = 3)]
        from: usize,

        #[arg(long, default_value_t = 4)]
        to: usize,

        /// Size of the key sample (keys 1..=N)
        #[arg(long, default_value_t = 10_000)]
        keys: i64,
    },

    /// Seed in-memory shards, read, add a shard, migrate, and read again
    Demo(demo::DemoArgs),
}

#[derive(Serialize)]
struct RingStats {
    version: &'static str,
    shards: usize,
    replicas: usize,
    points: usize,
    ownership: BTreeMap<ShardId, f64>,
    key: Option<KeyOwner>,
}

#[derive(Serialize)]
struct KeyOwner {
    key: i64,
    ring_key: u64,
    owner: ShardId,
}

/// Moved-key ratios of the ring and of `key mod N` for the same resize
fn resize_ratios(from: usize, to: usize, keys: i64, replicas: usize) -> anyhow::Result<(f64, f64)> {
    if from == 0 || to == 0 {
        anyhow::bail!("shard counts must be at least 1 (got --from {} --to {})", from, to);
    }
    let old_ids: Vec<ShardId> = (0..from).collect();
    let new_ids: Vec<ShardId> = (0..to).collect();
    let old = HashRing::build(&old_ids, replicas)?;
    let new = HashRing::build(&new_ids, replicas)?;

    let ring_ratio = estimate_moved_ratio(&old, &new, 1..=keys)?;
    let modulo_ratio = modulo_moved_ratio(1..=keys, from, to);
    Ok((ring_ratio, modulo_ratio))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedshard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => FeedConfig::load(path)?,
        None => FeedConfig::default(),
    };
    config.apply_env()?;

    match args.command {
        Command::Ring {
            shards,
            replicas,
            key,
            json,
        } => {
            let shard_count = shards.unwrap_or(config.shard_count);
            let replicas = replicas.unwrap_or(config.replicas);
            let ids: Vec<ShardId> = (0..shard_count).collect();
            let ring = HashRing::build(&ids, replicas)?;

            let key = match key {
                Some(k) => {
                    let ring_key = hash_key(k);
                    Some(KeyOwner {
                        key: k,
                        ring_key,
                        owner: ring.owner(ring_key)?,
                    })
                }
                None => None,
            };
            let stats = RingStats {
                version: env!("CARGO_PKG_VERSION"),
                shards: shard_count,
                replicas,
                points: ring.len(),
                ownership: ring.ownership_share(),
                key,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Ring: {} shards x {} replicas = {} points", stats.shards, stats.replicas, stats.points);
                for (shard, share) in &stats.ownership {
                    println!("  shard {}: {:.2}% of key space", shard, share * 100.0);
                }
                if let Some(k) = &stats.key {
                    println!("Key {} -> ring key {:#018x} -> shard {}", k.key, k.ring_key, k.owner);
                }
            }
        }
        Command::Moved { from, to, keys } => {
            let (ring_ratio, modulo_ratio) = resize_ratios(from, to, keys, config.replicas)?;

            println!("Resize {} -> {} shards over {} keys", from, to, keys);
            println!("  consistent ring: {:.2}% of keys move", ring_ratio * 100.0);
            println!("  key mod N:       {:.2}% of keys move", modulo_ratio * 100.0);
        }
        Command::Demo(demo_args) => demo::run(&config, demo_args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_ratios_rejects_zero_shards() {
        assert!(resize_ratios(0, 4, 100, 50).is_err());
        assert!(resize_ratios(3, 0, 100, 50).is_err());
    }

    #[test]
    fn test_resize_ratios_compares_same_resize() {
        let (ring, modulo) = resize_ratios(3, 4, 10_000, 200).unwrap();
        assert!(ring > 0.15 && ring < 0.35, "ring moved {}", ring);
        assert!(modulo > 0.7, "modulo moved {}", modulo);

        let (ring, modulo) = resize_ratios(4, 4, 1_000, 50).unwrap();
        assert_eq!((ring, modulo), (0.0, 0.0));
    }
}
