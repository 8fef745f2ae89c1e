//! Runtime configuration for stripecache.
//!
//! Configuration is loaded from a JSON file, falling back to defaults for
//! missing sections. Erasure parameters, backend region lists, and allocator
//! tuning all live here and are validated once at startup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "stripecache", about = "Geo-distributed cache for erasure-coded objects")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the recipe server and allocator loop.
    Proxy,

    /// Run an embedded read workload against the configured stores.
    Client {
        /// Object keys to read, comma separated.
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,

        /// Number of read rounds over the key set.
        #[arg(long, default_value_t = 1)]
        reads: usize,
    },
}

/// Configuration validation failures. These abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("longhair.k must be in [0, 256), got {0}")]
    InvalidK(usize),

    #[error("longhair.m must be in [0, {max}], got {m}")]
    InvalidM { m: usize, max: usize },

    #[error(
        "s3.regions, s3.endpoints and s3.buckets must have equal lengths, got {regions}/{endpoints}/{buckets}"
    )]
    MismatchedRegionLists {
        regions: usize,
        endpoints: usize,
        buckets: usize,
    },

    #[error("no backend regions configured")]
    NoBackendRegions,

    #[error("executor.threads must be at least 1")]
    NoWorkerThreads,

    #[error("allocator.decay must be in (0, 1], got {0}")]
    InvalidDecay(f64),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Erasure-coding parameters.
    pub longhair: LonghairConfig,

    /// Backend region definitions.
    pub s3: S3Config,

    /// Colocated cache store.
    pub memcached: MemcachedConfig,

    /// Worker pool sizing.
    pub executor: ExecutorConfig,

    /// Recipe server endpoint.
    pub proxy: ProxyConfig,

    /// Cache budget.
    pub cache: CacheConfig,

    /// Allocator tuning.
    pub allocator: AllocatorConfig,

    /// Client-side timeouts.
    pub client: ClientConfig,
}

/// Erasure-coding parameters. Must be configured identically on proxy and
/// client; k + m is the total block count per object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LonghairConfig {
    /// Number of data blocks needed to reconstruct an object.
    pub k: usize,

    /// Number of parity blocks.
    pub m: usize,
}

impl Default for LonghairConfig {
    fn default() -> Self {
        Self { k: 4, m: 2 }
    }
}

impl LonghairConfig {
    /// Total blocks per object.
    pub fn total_blocks(&self) -> usize {
        self.k + self.m
    }
}

/// Backend region lists. Element i of each list defines region i; block i of
/// an object lives in region `i mod regions.len()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct S3Config {
    pub regions: Vec<String>,
    pub endpoints: Vec<String>,
    pub buckets: Vec<String>,
}

/// Cache store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemcachedConfig {
    /// host:port of the colocated memcached server.
    pub server: String,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:11211".to_string(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrent block fetches (and, separately, repairs) in flight.
    pub threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { threads: 5 }
    }
}

/// Recipe server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,

    /// HTTP admin listen address.
    pub admin_listen: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11561,
            admin_listen: "127.0.0.1:11562".to_string(),
        }
    }
}

/// Cache budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total number of cached blocks across all keys.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// The gain curve weighting the marginal utility of caching one more block
/// of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainCurve {
    /// g(i) = max(0, k - i) / k: only blocks that displace a backend read on
    /// the way to the k-quorum carry weight.
    Quorum,

    /// g(i) = (n - i) / n over the full stripe width n = k + m: strictly
    /// positive, so leftover budget extends hot keys past the quorum prefix
    /// before it reaches cold keys.
    Stripe,
}

/// Allocator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Reallocation period in milliseconds.
    pub interval_ms: u64,

    /// Popularity decay factor in (0, 1]; 1.0 means plain access counts.
    pub decay: f64,

    /// Marginal-utility gain curve.
    pub gain: GainCurve,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            decay: 1.0,
            gain: GainCurve::Quorum,
        }
    }
}

/// Client-side timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Recipe request timeout; no reply within this window is treated as a
    /// zero-block recipe.
    pub recipe_timeout_ms: u64,

    /// Hard timeout for each individual cache or backend fetch.
    pub fetch_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            recipe_timeout_ms: 200,
            fetch_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Validate cross-field invariants. Called once at startup; failures
    /// abort with a non-zero exit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.longhair.k >= 256 {
            return Err(ConfigError::InvalidK(self.longhair.k));
        }
        let max_m = 256 - self.longhair.k;
        if self.longhair.m > max_m {
            return Err(ConfigError::InvalidM {
                m: self.longhair.m,
                max: max_m,
            });
        }
        if self.s3.regions.len() != self.s3.endpoints.len()
            || self.s3.endpoints.len() != self.s3.buckets.len()
        {
            return Err(ConfigError::MismatchedRegionLists {
                regions: self.s3.regions.len(),
                endpoints: self.s3.endpoints.len(),
                buckets: self.s3.buckets.len(),
            });
        }
        if self.executor.threads == 0 {
            return Err(ConfigError::NoWorkerThreads);
        }
        if !(self.allocator.decay > 0.0 && self.allocator.decay <= 1.0) {
            return Err(ConfigError::InvalidDecay(self.allocator.decay));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.longhair.total_blocks(), 6);
        assert_eq!(cfg.executor.threads, 5);
        assert_eq!(cfg.allocator.gain, GainCurve::Quorum);
    }

    #[test]
    fn test_invalid_erasure_params_rejected() {
        let mut cfg = Config::default();
        cfg.longhair.k = 256;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidK(256))));

        let mut cfg = Config::default();
        cfg.longhair.k = 200;
        cfg.longhair.m = 100;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidM { .. })));
    }

    #[test]
    fn test_unequal_region_lists_rejected() {
        let mut cfg = Config::default();
        cfg.s3.regions = vec!["eu-west-1".into(), "us-east-1".into()];
        cfg.s3.endpoints = vec!["http://a".into()];
        cfg.s3.buckets = vec!["b1".into(), "b2".into()];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MismatchedRegionLists { .. })
        ));
    }

    #[test]
    fn test_decay_bounds() {
        let mut cfg = Config::default();
        cfg.allocator.decay = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDecay(_))));

        cfg.allocator.decay = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"longhair": {"k": 8, "m": 4}, "cache": {"capacity": 12}}"#)
                .unwrap();
        assert_eq!(cfg.longhair.k, 8);
        assert_eq!(cfg.cache.capacity, 12);
        assert_eq!(cfg.client.recipe_timeout_ms, 200);
    }
}
