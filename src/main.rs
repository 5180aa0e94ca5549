use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keygate::{LimiterConfig, LimiterRegistry, RateLimiter};

/// Drive a per-key token bucket limiter with simulated users.
#[derive(Debug, Parser)]
#[command(name = "keygate", version, about)]
struct Args {
    /// YAML configuration file; `KEYGATE__DEFAULT__*` environment variables override its default policy
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bucket capacity for every key (overrides the configured default)
    #[arg(long)]
    capacity: Option<u32>,

    /// Tokens refilled per second (overrides the configured default)
    #[arg(long)]
    refill_rate: Option<f64>,

    /// Comma-separated keys, one simulated caller each
    #[arg(long, value_delimiter = ',', default_value = "alice,bob")]
    users: Vec<String>,

    /// Requests issued by each caller
    #[arg(long, default_value_t = 20)]
    requests: u32,

    /// Pause between a caller's requests, in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    info!("Starting Keygate demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = LimiterConfig::load(args.config.as_deref())?;
    if let Some(capacity) = args.capacity {
        config.default.capacity = f64::from(capacity);
    }
    if let Some(refill_rate) = args.refill_rate {
        config.default.refill_rate = refill_rate;
    }
    info!(
        capacity = config.default.capacity,
        refill_rate = config.default.refill_rate,
        overrides = config.overrides.len(),
        "Configuration loaded"
    );

    let limiter = Arc::new(LimiterRegistry::from_config(&config)?);

    let mut callers = JoinSet::new();
    for user in args.users {
        callers.spawn(simulate_user(
            Arc::clone(&limiter),
            user,
            args.requests,
            Duration::from_millis(args.interval_ms),
        ));
    }

    while let Some(result) = callers.join_next().await {
        let (user, admitted) = result?;
        info!(
            user = %user,
            admitted = admitted,
            limited = args.requests - admitted,
            "Caller finished"
        );
    }

    info!(buckets = limiter.bucket_count(), "Keygate demo finished");
    Ok(())
}

/// Issue `requests` calls for `user`, returning how many were admitted.
async fn simulate_user<L: RateLimiter>(
    limiter: L,
    user: String,
    requests: u32,
    interval: Duration,
) -> (String, u32) {
    let mut admitted = 0;
    for i in 1..=requests {
        if limiter.allow(&user) {
            admitted += 1;
            info!(user = %user, request = i, "allowed");
        } else {
            warn!(user = %user, request = i, "rate-limited");
        }
        tokio::time::sleep(interval).await;
    }
    (user, admitted)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
