//! Proxy RPC adapter.
//!
//! One recipe request per read: a single datagram out, a single datagram
//! back. No reply within the timeout means "no recipe" and the read proceeds
//! as if nothing were cached.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::wire::{Message, MAX_DATAGRAM};

/// Source of cache recipes. Answers are advisory: the read path falls back
/// to the backend on cache miss regardless.
#[async_trait]
pub trait RecipeSource: Send + Sync {
    /// How many blocks of `key` should currently be cached, or None if the
    /// proxy could not be reached in time.
    async fn cached_blocks(&self, key: &str) -> Option<usize>;
}

/// UDP recipe client. Each request uses a fresh ephemeral socket, so
/// concurrent reads never see each other's replies.
pub struct UdpRecipeClient {
    proxy_addr: SocketAddr,
    timeout: Duration,
}

impl UdpRecipeClient {
    pub fn new(proxy_addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            proxy_addr,
            timeout,
        }
    }

    async fn request(&self, key: &str) -> Option<usize> {
        let bind_addr: SocketAddr = if self.proxy_addr.is_ipv4() {
            "0.0.0.0:0".parse().ok()?
        } else {
            "[::]:0".parse().ok()?
        };
        let socket = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => socket,
            Err(err) => {
                debug!(%err, "failed to bind recipe socket");
                return None;
            }
        };
        if let Err(err) = socket.connect(self.proxy_addr).await {
            debug!(%err, "failed to connect recipe socket");
            return None;
        }

        let request = match (Message::RecipeRequest {
            key: key.to_string(),
        })
        .encode()
        {
            Ok(payload) => payload,
            Err(err) => {
                debug!(key, %err, "failed to encode recipe request");
                return None;
            }
        };
        if let Err(err) = socket.send(&request).await {
            debug!(%err, "failed to send recipe request");
            return None;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = match tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => len,
            Ok(Err(err)) => {
                debug!(%err, "recipe receive failed");
                return None;
            }
            Err(_) => {
                debug!(key, "recipe request timed out");
                return None;
            }
        };

        match Message::decode(&buf[..len]) {
            Ok(Message::RecipeReply {
                key: reply_key,
                cached_blocks,
            }) if reply_key == key => Some(cached_blocks as usize),
            Ok(other) => {
                debug!(key, ?other, "discarding mismatched recipe reply");
                None
            }
            Err(err) => {
                debug!(key, %err, "discarding malformed recipe reply");
                None
            }
        }
    }
}

#[async_trait]
impl RecipeSource for UdpRecipeClient {
    async fn cached_blocks(&self, key: &str) -> Option<usize> {
        self.request(key).await
    }
}

/// Fixed recipe for every key; handy for local runs without a proxy.
pub struct StaticRecipe(pub usize);

#[async_trait]
impl RecipeSource for StaticRecipe {
    async fn cached_blocks(&self, _key: &str) -> Option<usize> {
        Some(self.0)
    }
}
