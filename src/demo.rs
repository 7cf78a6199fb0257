//! End-to-end walkthrough over in-memory shards
//!
//! 1. Seed users across three shards placed by ring(3).
//! 2. Run a read phase through the consistent router.
//! 3. Add a fourth shard, estimate the moved-key ratio, and migrate.
//! 4. Publish ring(4) and run the same read phase again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Args;
use feedshard::sharding::{estimate_moved_ratio, hash_key, ModuloRouter};
use feedshard::{
    ConsistentHashRouter, FeedConfig, FeedQuery, FeedRouter, HashRing, MemoryShardStore, Migrator,
    Record, RingHandle, ShardStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of users to seed and migrate
    #[arg(long, default_value_t = 2000)]
    users: i64,

    #[arg(long, default_value_t = 3)]
    posts_per_user: usize,

    /// Read requests per phase
    #[arg(long, default_value_t = 300)]
    requests: usize,

    /// Concurrent readers
    #[arg(long, default_value_t = 20)]
    concurrency: usize,

    /// Users per feed request
    #[arg(long, default_value_t = 10)]
    subs: usize,

    #[arg(long)]
    limit: Option<usize>,

    /// Simulated per-query shard latency in milliseconds
    #[arg(long, default_value_t = 1)]
    latency_ms: u64,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

struct BenchStats {
    ok: usize,
    errors: usize,
    avg: Duration,
    p95: Duration,
    qps: f64,
}

pub async fn run(config: &FeedConfig, args: DemoArgs) -> anyhow::Result<()> {
    let limit = args.limit.unwrap_or(config.default_limit);
    let latency = Duration::from_millis(args.latency_ms);
    let shards: Vec<MemoryShardStore> = (0..4)
        .map(|_| MemoryShardStore::new().with_latency(latency))
        .collect();
    let stores: Vec<Arc<dyn ShardStore>> = shards
        .iter()
        .map(|s| Arc::new(s.clone()) as Arc<dyn ShardStore>)
        .collect();

    let ring3 = HashRing::build(&[0, 1, 2], config.replicas)?;
    tracing::info!("[phase:seed-3] users={} postsPerUser={}", args.users, args.posts_per_user);
    let seeded = seed(&stores, &ring3, args.users, args.posts_per_user, args.seed).await?;
    println!("Seeded {} records", seeded);
    print_counts(&shards);

    let handle = RingHandle::new(ring3.clone());
    let router = Arc::new(
        ConsistentHashRouter::new(stores.clone(), handle.clone())
            .with_policy(config.fan_out)
            .with_timeout(config.request_timeout())
            .with_window_days(config.cutoff_days),
    );

    tracing::info!("[phase:bench-3] requests={} concurrency={} limit={}", args.requests, args.concurrency, limit);
    report("ring(3)", &bench(router.clone(), &args, limit).await);

    let ring4 = HashRing::build(&[0, 1, 2, 3], config.replicas)?;
    let ratio = estimate_moved_ratio(&ring3, &ring4, 1..=args.users)?;
    println!(
        "Estimated moved users: {:.2}% (~{} of {})",
        ratio * 100.0,
        (ratio * args.users as f64).round(),
        args.users
    );

    let migrator = Migrator::new(stores.clone());
    let (migration, version) = migrator.rebalance(&handle, ring4, 1..=args.users).await?;
    println!(
        "Migrated {} users ({} records copied, {} deleted); ring now v{}",
        migration.moved, migration.records_copied, migration.records_deleted, version
    );
    print_counts(&shards);

    tracing::info!("[phase:bench-4] requests={} concurrency={} limit={}", args.requests, args.concurrency, limit);
    report("ring(4)", &bench(router.clone(), &args, limit).await);

    // Latency baseline only: its placement never matched the seeded data
    let n = config.modulo_shards.min(stores.len());
    let modulo = Arc::new(ModuloRouter::from_config(config, stores[..n].to_vec()));
    report(&format!("key mod {}", config.modulo_shards), &bench(modulo, &args, limit).await);

    Ok(())
}

async fn seed(
    stores: &[Arc<dyn ShardStore>],
    ring: &HashRing,
    users: i64,
    posts_per_user: usize,
    seed: u64,
) -> anyhow::Result<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let now = Utc::now();
    let year_secs = 365 * 24 * 3600;

    let mut batches: Vec<Vec<Record>> = vec![Vec::new(); stores.len()];
    let mut next_id = 1i64;
    for user in 1..=users {
        let owner = ring.owner(hash_key(user))?;
        for _ in 0..posts_per_user {
            let created_at = now - chrono::Duration::seconds(rng.gen_range(0..year_secs));
            let content: String = (0..40).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
            batches[owner].push(Record::new(next_id, user, created_at, content));
            next_id += 1;
        }
    }

    // One batch insert per shard, all shards at once
    let inserts = batches
        .into_iter()
        .zip(stores)
        .filter(|(batch, _)| !batch.is_empty())
        .map(|(batch, store)| store.insert(batch));
    let written = futures::future::try_join_all(inserts).await?;
    Ok(written.into_iter().sum())
}

async fn bench<R>(router: Arc<R>, args: &DemoArgs, limit: usize) -> BenchStats
where
    R: FeedRouter + 'static,
{
    let concurrency = args.concurrency.max(1);
    let per_worker = args.requests.div_ceil(concurrency);
    let start = Instant::now();

    let mut workers = JoinSet::new();
    for worker in 0..concurrency {
        let router = router.clone();
        let (users, subs, seed) = (args.users.max(1), args.subs, args.seed);
        workers.spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
            let mut samples = Vec::with_capacity(per_worker);
            for _ in 0..per_worker {
                let keys: Vec<i64> = (0..subs).map(|_| rng.gen_range(1..=users)).collect();
                let started = Instant::now();
                let result = router.get_feed(&FeedQuery::new(keys, limit)).await;
                samples.push((started.elapsed(), result.is_ok()));
            }
            samples
        });
    }

    let mut latencies = Vec::new();
    let mut errors = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(samples) => {
                for (elapsed, ok) in samples {
                    if ok {
                        latencies.push(elapsed);
                    } else {
                        errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Bench worker failed: {}", e);
                errors += per_worker;
            }
        }
    }
    let total = start.elapsed();

    latencies.sort();
    let ok = latencies.len();
    let avg = if ok == 0 {
        Duration::ZERO
    } else {
        latencies.iter().sum::<Duration>() / ok as u32
    };
    let p95 = if ok == 0 {
        Duration::ZERO
    } else {
        latencies[((ok as f64 * 0.95).ceil() as usize).clamp(1, ok) - 1]
    };
    BenchStats {
        ok,
        errors,
        avg,
        p95,
        qps: ok as f64 / total.as_secs_f64().max(f64::EPSILON),
    }
}

fn report(label: &str, stats: &BenchStats) {
    println!(
        "{:<10} requests={} errs={} avg={:?} p95={:?} qps={:.2}",
        label, stats.ok, stats.errors, stats.avg, stats.p95, stats.qps
    );
}

fn print_counts(shards: &[MemoryShardStore]) {
    let counts: Vec<String> = shards
        .iter()
        .enumerate()
        .map(|(i, s)| format!("shard {}: {}", i, s.len()))
        .collect();
    println!("  {}", counts.join(", "));
}
