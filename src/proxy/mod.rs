//! Proxy side: adaptive cache allocation and the recipe server.
//!
//! - [`allocator`]: popularity tracking and budget-constrained assignment of
//!   cached-block counts per key
//! - [`server`]: the UDP recipe endpoint, the periodic reallocation loop,
//!   and the HTTP admin surface

pub mod allocator;
pub mod server;

pub use allocator::{Allocator, AllocatorParams};
pub use server::RecipeServer;
