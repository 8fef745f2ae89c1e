//! Store interfaces consumed by the read path.
//!
//! - [`CacheStore`]: the colocated single-node memory cache (get/put).
//! - [`BackendStore`]: one remote blob region (get only; the read path is
//!   the only path, writes happen out of band).
//!
//! Adapters:
//! - [`memcached`]: memcached text protocol over TCP
//! - [`s3`]: S3-compatible blob regions via `object_store`
//! - [`memory`]: in-memory stores for tests and local runs

pub mod memcached;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Store key for block `index` of object `key`: the plain concatenation
/// `key ∥ decimal(index)`, no delimiter. Object keys must not end in a
/// digit for this to be unambiguous; that is the workload's contract.
pub fn block_key(key: &str, index: usize) -> String {
    format!("{key}{index}")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The colocated cache store. No TTL or size semantics are assumed here;
/// eviction, if any, is the store's business.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;
}

/// A single backend region. Individual regions may be slow or unavailable;
/// the k-of-(k+m) read absorbs that.
#[async_trait]
pub trait BackendStore: Send + Sync {
    /// Region name, for logging.
    fn region(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;
}
