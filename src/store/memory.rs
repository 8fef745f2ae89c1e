//! In-memory cache and backend stores.
//!
//! Used by tests, benches, and local runs; behaviorally equivalent to the
//! network adapters minus the network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::store::{BackendStore, CacheStore, StoreError};

/// In-memory [`CacheStore`]. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// In-memory [`BackendStore`] for one region. Cloning shares the blobs.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    region: String,
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBackend {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            blobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed a blob into the region, out of band of the read path.
    pub fn insert(&self, key: impl Into<String>, value: Bytes) {
        self.blobs.lock().insert(key.into(), value);
    }
}

#[async_trait]
impl BackendStore for MemoryBackend {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blobs.lock().get(key).cloned())
    }
}
