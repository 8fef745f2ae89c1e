//! S3 backend adapter.
//!
//! One [`S3Backend`] per configured region, each bound to a bucket in that
//! region. Credentials come from the environment (AWS_ACCESS_KEY_ID /
//! AWS_SECRET_ACCESS_KEY or an instance profile).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::debug;

use crate::config::S3Config;
use crate::store::{BackendStore, StoreError};

/// One S3-compatible backend region.
pub struct S3Backend {
    region: String,
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl S3Backend {
    pub fn new(region: &str, endpoint: &str, bucket: &str) -> Result<Self, StoreError> {
        let store = AmazonS3Builder::from_env()
            .with_region(region)
            .with_endpoint(endpoint)
            .with_bucket_name(bucket)
            .with_allow_http(true)
            .build()?;
        debug!(region, endpoint, bucket, "S3 connection established");
        Ok(Self {
            region: region.to_string(),
            bucket: bucket.to_string(),
            store: Arc::new(store),
        })
    }

    /// Bucket this region serves.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Build one backend per configured region. List lengths are validated
    /// at config time.
    pub fn connect_all(cfg: &S3Config) -> Result<Vec<Arc<dyn BackendStore>>, StoreError> {
        let mut backends: Vec<Arc<dyn BackendStore>> = Vec::with_capacity(cfg.regions.len());
        for ((region, endpoint), bucket) in cfg
            .regions
            .iter()
            .zip(cfg.endpoints.iter())
            .zip(cfg.buckets.iter())
        {
            backends.push(Arc::new(S3Backend::new(region, endpoint, bucket)?));
        }
        Ok(backends)
    }
}

#[async_trait]
impl BackendStore for S3Backend {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self.store.get(&ObjectPath::from(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
