//! stripecache: geo-distributed read-path cache for erasure-coded objects.
//!
//! Objects are erasure-coded into k+m blocks spread one-per-region across
//! remote backend stores; any k blocks reconstruct the object. A cache
//! colocated with the reader holds a prefix of each object's blocks, and a
//! process-wide proxy decides per key how many blocks that prefix should
//! contain (the "cache recipe"):
//!
//!   Workload ──read(key)──▶ Client ──recipe?──▶ Proxy (allocator)
//!                            │   ▲
//!                   cache get/put  backend get (k+m regions)
//!
//! Clients race cache and backend fetches, stop at the k-quorum, decode, and
//! repair expected-but-missing cache blocks in the background.

pub mod client;
pub mod codec;
pub mod config;
pub mod proxy;
pub mod store;
pub mod wire;
