//! The recipe server.
//!
//! One UDP socket answers recipe requests: parse, feed the allocator's
//! popularity table, reply with the key's current cached-block count.
//! Malformed datagrams are silently dropped; the client treats no-reply as a
//! zero-block recipe after its timeout. A background task reallocates on a
//! fixed interval, and an HTTP admin surface exposes health, allocator
//! stats, and on-demand reallocation.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::{TcpListener, ToSocketAddrs, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::proxy::allocator::{Allocator, AllocatorParams};
use crate::wire::{Message, MAX_DATAGRAM};

/// The UDP recipe endpoint. Stateless per request.
pub struct RecipeServer {
    socket: UdpSocket,
    allocator: Arc<Allocator>,
}

impl RecipeServer {
    pub async fn bind(addr: impl ToSocketAddrs, allocator: Arc<Allocator>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, allocator })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests until the socket fails.
    pub async fn serve(self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if let Some(reply) = handle_datagram(&self.allocator, &buf[..len]) {
                if let Err(err) = self.socket.send_to(&reply, peer).await {
                    warn!(%peer, %err, "failed to send recipe reply");
                }
            }
        }
    }
}

/// Handle one datagram: a well-formed request yields a reply payload,
/// everything else is dropped.
pub fn handle_datagram(allocator: &Allocator, datagram: &[u8]) -> Option<Vec<u8>> {
    let message = match Message::decode(datagram) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "dropping malformed datagram");
            return None;
        }
    };

    match message {
        Message::RecipeRequest { key } => {
            allocator.on_access(&key);
            let cached = allocator.recipe_of(&key);
            debug!(key, cached_blocks = cached, "recipe request");

            let reply = Message::RecipeReply {
                key,
                cached_blocks: cached as u16,
            };
            match reply.encode() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    debug!(%err, "dropping unencodable reply");
                    None
                }
            }
        }
        Message::RecipeReply { .. } => {
            debug!("dropping unexpected recipe reply");
            None
        }
    }
}

/// Run the proxy: recipe server, periodic reallocation, and the admin
/// surface. Returns only on listener failure.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let allocator = Arc::new(Allocator::new(AllocatorParams::from_config(&config)));

    let server = RecipeServer::bind(
        (config.proxy.host.as_str(), config.proxy.port),
        allocator.clone(),
    )
    .await?;
    info!(addr = %server.local_addr()?, "recipe server listening");
    tokio::spawn(async move {
        if let Err(err) = server.serve().await {
            error!(%err, "recipe server terminated");
        }
    });

    let period = std::time::Duration::from_millis(config.allocator.interval_ms);
    let loop_allocator = allocator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let start = Instant::now();
            let summary = loop_allocator.reallocate();
            info!(
                keys = summary.keys_tracked,
                cached_keys = summary.keys_cached,
                blocks = summary.blocks_assigned,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "reallocation complete"
            );
        }
    });

    let state = AdminState {
        allocator,
        budget: config.cache.capacity,
        start_time: Instant::now(),
    };
    let router = build_admin_router(state);
    let listener = TcpListener::bind(&config.proxy.admin_listen).await?;
    info!(addr = %listener.local_addr()?, "admin interface listening");
    axum::serve(listener, router).await?;

    Ok(())
}

// ─── Admin surface ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AdminState {
    allocator: Arc<Allocator>,
    budget: usize,
    start_time: Instant,
}

/// Build the admin router.
fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/reallocate", post(reallocate))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    allocator: AllocatorStatsResponse,
}

#[derive(Debug, Serialize)]
struct AllocatorStatsResponse {
    tracked_keys: usize,
    cached_keys: usize,
    blocks_assigned: usize,
    budget: usize,
}

fn allocator_stats(state: &AdminState) -> AllocatorStatsResponse {
    AllocatorStatsResponse {
        tracked_keys: state.allocator.tracked_keys(),
        cached_keys: state.allocator.cached_keys(),
        blocks_assigned: state.allocator.assigned_blocks(),
        budget: state.budget,
    }
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        allocator: allocator_stats(&state),
    })
}

async fn stats(State(state): State<AdminState>) -> Json<AllocatorStatsResponse> {
    Json(allocator_stats(&state))
}

async fn reallocate(State(state): State<AdminState>) -> Json<AllocatorStatsResponse> {
    let summary = state.allocator.reallocate();
    info!(
        keys = summary.keys_tracked,
        cached_keys = summary.keys_cached,
        blocks = summary.blocks_assigned,
        "on-demand reallocation"
    );
    Json(allocator_stats(&state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GainCurve;

    fn test_allocator() -> Allocator {
        Allocator::new(AllocatorParams {
            k: 4,
            m: 2,
            budget: 6,
            decay: 1.0,
            gain: GainCurve::Quorum,
        })
    }

    #[test]
    fn test_request_yields_reply_and_feeds_popularity() {
        let allocator = test_allocator();
        let request = Message::RecipeRequest {
            key: "obj".to_string(),
        }
        .encode()
        .unwrap();

        let reply = handle_datagram(&allocator, &request).unwrap();
        assert_eq!(
            Message::decode(&reply).unwrap(),
            Message::RecipeReply {
                key: "obj".to_string(),
                cached_blocks: 0,
            }
        );
        assert_eq!(allocator.weight_of("obj"), 1.0);
    }

    #[test]
    fn test_reply_after_reallocation_carries_recipe() {
        let allocator = test_allocator();
        allocator.on_access("obj");
        allocator.reallocate();

        let request = Message::RecipeRequest {
            key: "obj".to_string(),
        }
        .encode()
        .unwrap();
        let reply = handle_datagram(&allocator, &request).unwrap();
        assert_eq!(
            Message::decode(&reply).unwrap(),
            Message::RecipeReply {
                key: "obj".to_string(),
                cached_blocks: 6,
            }
        );
    }

    #[test]
    fn test_malformed_datagrams_dropped() {
        let allocator = test_allocator();
        assert!(handle_datagram(&allocator, &[]).is_none());
        assert!(handle_datagram(&allocator, &[99, 0, 0]).is_none());

        // A stray reply is dropped too.
        let reply = Message::RecipeReply {
            key: "obj".to_string(),
            cached_blocks: 1,
        }
        .encode()
        .unwrap();
        assert!(handle_datagram(&allocator, &reply).is_none());
    }
}
