//! End-to-end tests for the racing read engine: in-memory stores, the real
//! codec, and scripted backend failures. k=4, m=2, one block per region.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use stripecache::client::{CacheClient, CacheStats, RecipeSource, UdpRecipeClient};
use stripecache::codec::{BlockCodec, StripeCodec};
use stripecache::config::Config;
use stripecache::store::memory::{MemoryBackend, MemoryCache};
use stripecache::store::{block_key, BackendStore, CacheStore, StoreError};

const K: usize = 4;
const M: usize = 2;
const REGIONS: usize = 6;

/// Geo-distance stand-in: cache answers instantly, backends only after this
/// delay, so races resolve the same way every run.
const BACKEND_DELAY: Duration = Duration::from_millis(50);

/// Recipe source whose answer can be changed mid-test, standing in for a
/// proxy reallocation.
struct DynRecipe(AtomicUsize);

impl DynRecipe {
    fn new(cached_blocks: usize) -> Arc<Self> {
        Arc::new(Self(AtomicUsize::new(cached_blocks)))
    }

    fn set(&self, cached_blocks: usize) {
        self.0.store(cached_blocks, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecipeSource for DynRecipe {
    async fn cached_blocks(&self, _key: &str) -> Option<usize> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

/// Backend whose region is permanently unavailable.
struct DeadBackend(String);

#[async_trait]
impl BackendStore for DeadBackend {
    fn region(&self) -> &str {
        &self.0
    }

    async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
        Err(StoreError::Protocol("region unavailable".to_string()))
    }
}

/// Backend that answers after a fixed delay.
struct SlowBackend {
    inner: MemoryBackend,
    delay: Duration,
}

#[async_trait]
impl BackendStore for SlowBackend {
    fn region(&self) -> &str {
        self.inner.region()
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.longhair.k = K;
    config.longhair.m = M;
    config
}

fn test_object() -> Vec<u8> {
    (0..8192u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// One in-memory region per block index, seeded with the encoded object.
fn seeded_regions(codec: &StripeCodec, key: &str, data: &[u8]) -> Vec<MemoryBackend> {
    let regions: Vec<MemoryBackend> = (0..REGIONS)
        .map(|i| MemoryBackend::new(format!("region-{i}")))
        .collect();
    let blocks = codec.encode(data).unwrap();
    for (i, block) in blocks.iter().enumerate() {
        regions[i % REGIONS].insert(block_key(key, i), block.clone());
    }
    regions
}

fn slow(regions: &[MemoryBackend]) -> Vec<Arc<dyn BackendStore>> {
    regions
        .iter()
        .map(|r| {
            Arc::new(SlowBackend {
                inner: r.clone(),
                delay: BACKEND_DELAY,
            }) as Arc<dyn BackendStore>
        })
        .collect()
}

fn fast(regions: &[MemoryBackend]) -> Vec<Arc<dyn BackendStore>> {
    regions
        .iter()
        .map(|r| Arc::new(r.clone()) as Arc<dyn BackendStore>)
        .collect()
}

fn client(
    recipe: Arc<dyn RecipeSource>,
    cache: &MemoryCache,
    backends: Vec<Arc<dyn BackendStore>>,
) -> (CacheClient, Arc<CacheStats>) {
    let codec = Arc::new(StripeCodec::new(K, M).unwrap());
    let stats = Arc::new(CacheStats::default());
    let client = CacheClient::new(
        recipe,
        Arc::new(cache.clone()),
        backends,
        codec,
        stats.clone(),
        &test_config(),
    )
    .unwrap();
    (client, stats)
}

#[tokio::test]
async fn test_cold_miss_then_warm_hit() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);
    let cache = MemoryCache::new();
    let recipe = DynRecipe::new(0);
    let (client, stats) = client(recipe.clone(), &cache, slow(&regions));

    // Cold read with no recipe: served from backends, counted as a miss, no
    // repairs because nothing was expected in cache.
    let first = client.read("obj").await.unwrap();
    assert_eq!(first, Bytes::from(data.clone()));
    assert_eq!(stats.misses(), 1);
    assert!(cache.is_empty());

    // The proxy reallocates and hands out the full stripe.
    recipe.set(6);

    // Still a miss, but now the k fetched blocks get repaired into cache.
    let second = client.read("obj").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(stats.misses(), 2);

    client.shutdown().await;
    assert_eq!(cache.len(), K);

    // Warm read: the cached prefix races ahead of the slow backends and
    // fills the quorum alone.
    let third = client.read("obj").await.unwrap();
    assert_eq!(third, first);
    assert_eq!(stats.hits(), 1);

    let snap = stats.snapshot();
    assert_eq!(snap.total(), 3);
    assert_eq!(snap.hits + snap.partial_hits + snap.misses, 3);
}

#[tokio::test]
async fn test_partial_hit_with_cached_prefix() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    // Blocks 0..3 pre-populated, matching a recipe of 3.
    let cache = MemoryCache::new();
    let blocks = codec.encode(&data).unwrap();
    for i in 0..3 {
        cache.put(&block_key("obj", i), blocks[i].clone()).await.unwrap();
    }

    let (client, stats) = client(DynRecipe::new(3), &cache, slow(&regions));

    let result = client.read("obj").await.unwrap();
    assert_eq!(result, Bytes::from(data));
    assert_eq!(stats.partial_hits(), 1);
    assert_eq!(stats.snapshot().total(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_read_survives_m_failed_regions() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    // Regions 3 and 4 are down: exactly m failures, quorum still reachable.
    let mut backends = fast(&regions);
    backends[3] = Arc::new(DeadBackend("region-3".to_string()));
    backends[4] = Arc::new(DeadBackend("region-4".to_string()));

    let cache = MemoryCache::new();
    let (client, stats) = client(DynRecipe::new(0), &cache, backends);

    let result = client.read("obj").await.unwrap();
    assert_eq!(result, Bytes::from(data));
    assert_eq!(stats.misses(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_read_fails_when_quorum_impossible() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    // m + 1 regions down: at most k - 1 blocks can arrive.
    let mut backends = fast(&regions);
    for i in [2, 3, 4] {
        backends[i] = Arc::new(DeadBackend(format!("region-{i}")));
    }

    let cache = MemoryCache::new();
    let (client, stats) = client(DynRecipe::new(0), &cache, backends);

    assert!(client.read("obj").await.is_none());
    assert_eq!(stats.misses(), 1);
    assert_eq!(stats.snapshot().total(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_full_stripe_in_cache_needs_no_backend() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();

    let cache = MemoryCache::new();
    let blocks = codec.encode(&data).unwrap();
    for (i, block) in blocks.iter().enumerate() {
        cache.put(&block_key("obj", i), block.clone()).await.unwrap();
    }

    // Every backend is dead; the cache alone carries the read.
    let backends: Vec<Arc<dyn BackendStore>> = (0..REGIONS)
        .map(|i| Arc::new(DeadBackend(format!("region-{i}"))) as Arc<dyn BackendStore>)
        .collect();

    let (client, stats) = client(DynRecipe::new(6), &cache, backends);

    let result = client.read("obj").await.unwrap();
    assert_eq!(result, Bytes::from(data));
    assert_eq!(stats.hits(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_repairs_stay_inside_recipe_prefix() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    // Regions 0 and 1 answer instantly, the rest lag, so blocks 0 and 1 are
    // always part of the quorum.
    let mut backends = fast(&regions);
    for (i, backend) in backends.iter_mut().enumerate().skip(2) {
        *backend = Arc::new(SlowBackend {
            inner: regions[i].clone(),
            delay: BACKEND_DELAY,
        });
    }

    let cache = MemoryCache::new();
    let (client, stats) = client(DynRecipe::new(2), &cache, backends);

    let result = client.read("obj").await.unwrap();
    assert_eq!(result, Bytes::from(data));
    assert_eq!(stats.misses(), 1);

    client.shutdown().await;

    // Only the recipe prefix may be repaired, regardless of which other
    // blocks the quorum picked up.
    assert!(cache.contains(&block_key("obj", 0)));
    assert!(cache.contains(&block_key("obj", 1)));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_repairs_are_idempotent() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    let mut backends = fast(&regions);
    for (i, backend) in backends.iter_mut().enumerate().skip(2) {
        *backend = Arc::new(SlowBackend {
            inner: regions[i].clone(),
            delay: BACKEND_DELAY,
        });
    }

    let cache = MemoryCache::new();
    let (client, _stats) = client(DynRecipe::new(2), &cache, backends);

    client.read("obj").await.unwrap();
    client.read("obj").await.unwrap();
    client.shutdown().await;

    // Submitting the same repair twice leaves the same cache state.
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.get(&block_key("obj", 0)).await.unwrap(),
        Some(codec.encode(&data).unwrap()[0].clone())
    );
}

#[tokio::test]
async fn test_proxy_timeout_degrades_to_uncached_read() {
    let codec = StripeCodec::new(K, M).unwrap();
    let data = test_object();
    let regions = seeded_regions(&codec, "obj", &data);

    // A bound socket that never answers: the recipe request must time out
    // and the read proceed as if nothing were cached.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let recipe = Arc::new(UdpRecipeClient::new(
        silent.local_addr().unwrap(),
        Duration::from_millis(100),
    ));

    let cache = MemoryCache::new();
    let (client, stats) = client(recipe, &cache, fast(&regions));

    let start = Instant::now();
    let result = client.read("obj").await.unwrap();
    assert_eq!(result, Bytes::from(data));
    assert!(start.elapsed() < Duration::from_secs(2), "read must not hang");
    assert_eq!(stats.misses(), 1);
    client.shutdown().await;
}
