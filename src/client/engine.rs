//! The racing read engine.
//!
//! A read launches one fetch task per block index: indices inside the recipe
//! prefix try the cache first and fall back to the backend, the rest go
//! straight to their backend region. Results are consumed in completion
//! order until k blocks are in hand (quorum) or m+1 fetches have failed
//! (quorum impossible); stragglers are cancelled without being awaited.
//! After decode, blocks that the recipe expected in cache but that came from
//! the backend are written back in the background.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::recipe::RecipeSource;
use crate::client::stats::CacheStats;
use crate::codec::BlockCodec;
use crate::config::{Config, ConfigError};
use crate::store::{block_key, BackendStore, CacheStore};

/// Where a fetched block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Backend,
}

/// One erasure-coded block in flight during a read.
#[derive(Debug, Clone)]
pub struct EcBlock {
    pub index: usize,
    pub bytes: Bytes,
    pub origin: Origin,
}

/// The client read engine. Safe to share and invoke concurrently from many
/// workload tasks; all reads share the bounded fetch and repair pools.
pub struct CacheClient {
    recipe: Arc<dyn RecipeSource>,
    cache: Arc<dyn CacheStore>,
    backends: Vec<Arc<dyn BackendStore>>,
    codec: Arc<dyn BlockCodec>,
    stats: Arc<CacheStats>,
    fetch_permits: Arc<Semaphore>,
    repair_permits: Arc<Semaphore>,
    repairs: TaskTracker,
    fetch_timeout: Duration,
}

impl CacheClient {
    pub fn new(
        recipe: Arc<dyn RecipeSource>,
        cache: Arc<dyn CacheStore>,
        backends: Vec<Arc<dyn BackendStore>>,
        codec: Arc<dyn BlockCodec>,
        stats: Arc<CacheStats>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackendRegions);
        }
        if config.executor.threads == 0 {
            return Err(ConfigError::NoWorkerThreads);
        }

        Ok(Self {
            recipe,
            cache,
            backends,
            codec,
            stats,
            fetch_permits: Arc::new(Semaphore::new(config.executor.threads)),
            repair_permits: Arc::new(Semaphore::new(config.executor.threads)),
            repairs: TaskTracker::new(),
            fetch_timeout: Duration::from_millis(config.client.fetch_timeout_ms),
        })
    }

    /// Statistics handle shared by all reads of this client.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Read and reconstruct the object under `key`. Returns None when fewer
    /// than k blocks could be fetched or the codec rejects the block set;
    /// every other error is absorbed into the per-block failure accounting.
    pub async fn read(&self, key: &str) -> Option<Bytes> {
        let k = self.codec.data_blocks();
        let total = self.codec.total_blocks();
        let m = total - k;

        // The recipe strictly precedes all block fetches. An unreachable
        // proxy degrades to an uncached read.
        let cached_blocks = match self.recipe.cached_blocks(key).await {
            Some(count) => count.min(total),
            None => 0,
        };
        debug!(key, cached_blocks, "recipe received");

        let mut fetches: JoinSet<(usize, Option<EcBlock>)> = JoinSet::new();
        for index in 0..total {
            let cache = self.cache.clone();
            let backend = self.backends[index % self.backends.len()].clone();
            let permits = self.fetch_permits.clone();
            let key = key.to_string();
            let try_cache = index < cached_blocks;
            let fetch_timeout = self.fetch_timeout;

            fetches.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, None),
                };
                let block =
                    fetch_block(&cache, &backend, &key, index, try_cache, fetch_timeout).await;
                (index, block)
            });
        }

        let mut blocks: Vec<EcBlock> = Vec::with_capacity(k);
        let mut failures = 0usize;
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((_, Some(block))) => {
                    blocks.push(block);
                    if blocks.len() == k {
                        break;
                    }
                }
                Ok((index, None)) => {
                    debug!(key, block = index, "block fetch failed");
                    failures += 1;
                    if failures == m + 1 {
                        break;
                    }
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        warn!(key, %err, "block fetch task failed");
                        failures += 1;
                        if failures == m + 1 {
                            break;
                        }
                    }
                }
            }
        }
        // Cancel stragglers; their results are discarded, never awaited.
        fetches.abort_all();

        let from_cache = blocks.iter().filter(|b| b.origin == Origin::Cache).count();
        let from_backend = blocks.len() - from_cache;

        if blocks.len() < k {
            warn!(
                key,
                successes = blocks.len(),
                failures,
                "quorum lost, read failed"
            );
            self.stats.record_miss();
            return None;
        }

        let indexed: Vec<(usize, Bytes)> =
            blocks.iter().map(|b| (b.index, b.bytes.clone())).collect();
        let data = match self.codec.decode(&indexed) {
            Ok(data) => data,
            Err(err) => {
                // With an authentic k-quorum this cannot happen; treat it as
                // a logic bug rather than a storage fault.
                error!(key, %err, "decode failed despite quorum");
                self.record_read(from_cache, from_backend, k);
                return None;
            }
        };

        let missing = cached_blocks.saturating_sub(from_cache);
        if missing > 0 {
            self.schedule_repairs(key, &blocks, cached_blocks, missing);
        }

        self.record_read(from_cache, from_backend, k);

        info!(
            key,
            bytes = data.len(),
            from_cache,
            from_backend,
            "read complete"
        );
        Some(Bytes::from(data))
    }

    /// Exactly one counter per completed read.
    fn record_read(&self, from_cache: usize, from_backend: usize, k: usize) {
        if from_cache == k {
            self.stats.record_hit();
        } else if from_cache > 0 && from_backend > 0 {
            self.stats.record_partial_hit();
        } else {
            self.stats.record_miss();
        }
    }

    /// Submit up to `missing` background cache writes for backend-origin
    /// blocks inside the recipe prefix, walking the successful set from the
    /// highest index downward. Repairs are never cancelled by the read path.
    fn schedule_repairs(&self, key: &str, blocks: &[EcBlock], cached_blocks: usize, missing: usize) {
        let mut candidates: Vec<&EcBlock> = blocks.iter().collect();
        candidates.sort_by(|a, b| b.index.cmp(&a.index));

        let mut remaining = missing;
        for block in candidates {
            if remaining == 0 {
                break;
            }
            if block.origin != Origin::Backend || block.index >= cached_blocks {
                continue;
            }
            remaining -= 1;

            let cache = self.cache.clone();
            let permits = self.repair_permits.clone();
            let store_key = block_key(key, block.index);
            let bytes = block.bytes.clone();
            let key = key.to_string();
            let index = block.index;
            self.repairs.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                match cache.put(&store_key, bytes).await {
                    Ok(()) => debug!(key, block = index, "cached missing block"),
                    Err(err) => warn!(key, block = index, %err, "cache repair failed"),
                }
            });
        }
    }

    /// Drain outstanding repairs and log cumulative statistics. Call once
    /// when the workload is done with this client.
    pub async fn shutdown(&self) {
        self.repairs.close();
        self.repairs.wait().await;

        let snap = self.stats.snapshot();
        info!(
            hits = snap.hits,
            partial_hits = snap.partial_hits,
            misses = snap.misses,
            "client shut down"
        );
    }
}

/// Fetch one block: cache first when the recipe says so, then the block's
/// backend region. Returns None when neither source produced bytes.
async fn fetch_block(
    cache: &Arc<dyn CacheStore>,
    backend: &Arc<dyn BackendStore>,
    key: &str,
    index: usize,
    try_cache: bool,
    fetch_timeout: Duration,
) -> Option<EcBlock> {
    let store_key = block_key(key, index);

    if try_cache {
        match timeout(fetch_timeout, cache.get(&store_key)).await {
            Ok(Ok(Some(bytes))) => {
                debug!(key, block = index, "cache hit");
                return Some(EcBlock {
                    index,
                    bytes,
                    origin: Origin::Cache,
                });
            }
            Ok(Ok(None)) => debug!(key, block = index, "cache miss"),
            Ok(Err(err)) => debug!(key, block = index, %err, "cache read failed"),
            Err(_) => debug!(key, block = index, "cache read timed out"),
        }
    }

    match timeout(fetch_timeout, backend.get(&store_key)).await {
        Ok(Ok(Some(bytes))) => Some(EcBlock {
            index,
            bytes,
            origin: Origin::Backend,
        }),
        Ok(Ok(None)) => {
            debug!(
                key,
                block = index,
                region = backend.region(),
                "block missing from backend"
            );
            None
        }
        Ok(Err(err)) => {
            debug!(key, block = index, region = backend.region(), %err, "backend read failed");
            None
        }
        Err(_) => {
            debug!(
                key,
                block = index,
                region = backend.region(),
                "backend read timed out"
            );
            None
        }
    }
}
