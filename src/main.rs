//! stripecache: geo-distributed read-path cache for erasure-coded objects.
//!
//! Two entry points share one binary:
//!   `stripecache proxy`  — recipe server + adaptive allocator loop
//!   `stripecache client` — embedded read workload against the configured
//!                          cache, backends, and proxy

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use stripecache::client::{CacheClient, CacheStats, UdpRecipeClient};
use stripecache::codec::StripeCodec;
use stripecache::config::{Cli, Command, Config};
use stripecache::proxy::server;
use stripecache::store::memcached::MemcachedCache;
use stripecache::store::s3::S3Backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "stripecache=debug"
    } else {
        "stripecache=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("stripecache v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    config.validate()?;
    let config = Arc::new(config);

    info!(
        k = config.longhair.k,
        m = config.longhair.m,
        regions = config.s3.regions.len(),
        budget = config.cache.capacity,
        "configuration loaded"
    );

    match cli.command {
        Command::Proxy => server::run(config).await,
        Command::Client { keys, reads } => run_client(config, keys, reads).await,
    }
}

/// Build the real adapters and drive the read workload: init → read* →
/// cleanup.
async fn run_client(config: Arc<Config>, keys: Vec<String>, reads: usize) -> anyhow::Result<()> {
    if keys.is_empty() {
        anyhow::bail!("at least one key is required, pass --keys");
    }

    let codec = Arc::new(StripeCodec::new(config.longhair.k, config.longhair.m)?);

    let cache = Arc::new(
        MemcachedCache::connect(config.memcached.server.clone())
            .await
            .with_context(|| format!("connecting to memcached at {}", config.memcached.server))?,
    );
    let backends = S3Backend::connect_all(&config.s3).context("connecting to backend regions")?;

    let proxy_addr = tokio::net::lookup_host((config.proxy.host.as_str(), config.proxy.port))
        .await?
        .next()
        .with_context(|| format!("cannot resolve proxy host {}", config.proxy.host))?;
    let recipe = Arc::new(UdpRecipeClient::new(
        proxy_addr,
        Duration::from_millis(config.client.recipe_timeout_ms),
    ));

    let stats = Arc::new(CacheStats::default());
    let client = CacheClient::new(recipe, cache, backends, codec, stats.clone(), &config)?;

    for round in 0..reads {
        for key in &keys {
            if client.read(key).await.is_none() {
                warn!(key, round, "read failed");
            }
        }
    }

    client.shutdown().await;

    let snap = stats.snapshot();
    info!(
        reads = snap.total(),
        hits = snap.hits,
        partial_hits = snap.partial_hits,
        misses = snap.misses,
        "workload complete"
    );
    Ok(())
}
