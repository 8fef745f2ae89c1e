//! Memcached cache adapter.
//!
//! Speaks the memcached text protocol (get/set) over a single long-lived
//! TCP connection. Commands are serialized through a mutex; the connection
//! is re-established lazily after an I/O error.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{CacheStore, StoreError};

type Conn = BufStream<TcpStream>;

/// Memcached-backed [`CacheStore`].
pub struct MemcachedCache {
    addr: String,
    conn: Mutex<Option<Conn>>,
}

impl MemcachedCache {
    /// Connect to a memcached server at `host:port`.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, StoreError> {
        let addr = addr.into();
        let stream = TcpStream::connect(&addr).await?;
        debug!(addr = %addr, "connected to memcached");
        Ok(Self {
            addr,
            conn: Mutex::new(Some(BufStream::new(stream))),
        })
    }

    /// Server address this cache talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn ensure<'a>(&self, guard: &'a mut Option<Conn>) -> Result<&'a mut Conn, StoreError> {
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            debug!(addr = %self.addr, "reconnected to memcached");
            *guard = Some(BufStream::new(stream));
        }
        match guard.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(StoreError::Protocol(
                "memcached connection unavailable".to_string(),
            )),
        }
    }

    async fn get_inner(conn: &mut Conn, key: &str) -> Result<Option<Bytes>, StoreError> {
        conn.write_all(format!("get {key}\r\n").as_bytes()).await?;
        conn.flush().await?;

        let header = read_line(conn).await?;
        if header == "END" {
            return Ok(None);
        }

        let mut parts = header.split_whitespace();
        if parts.next() != Some("VALUE") {
            return Err(StoreError::Protocol(format!(
                "unexpected memcached reply: {header}"
            )));
        }
        let _key = parts.next();
        let _flags = parts.next();
        let len: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::Protocol(format!("bad VALUE header: {header}")))?;

        let mut data = vec![0u8; len];
        conn.read_exact(&mut data).await?;
        let mut crlf = [0u8; 2];
        conn.read_exact(&mut crlf).await?;

        let end = read_line(conn).await?;
        if end != "END" {
            return Err(StoreError::Protocol(format!(
                "expected END after value, got: {end}"
            )));
        }

        Ok(Some(Bytes::from(data)))
    }

    async fn put_inner(conn: &mut Conn, key: &str, value: &[u8]) -> Result<(), StoreError> {
        conn.write_all(format!("set {key} 0 0 {}\r\n", value.len()).as_bytes())
            .await?;
        conn.write_all(value).await?;
        conn.write_all(b"\r\n").await?;
        conn.flush().await?;

        let reply = read_line(conn).await?;
        if reply != "STORED" {
            return Err(StoreError::Protocol(format!(
                "memcached refused set: {reply}"
            )));
        }
        Ok(())
    }
}

async fn read_line(conn: &mut Conn) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = conn.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Protocol(
            "memcached closed the connection".to_string(),
        ));
    }
    Ok(line.trim_end().to_string())
}

#[async_trait::async_trait]
impl CacheStore for MemcachedCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = self.ensure(&mut guard).await?;
        let result = Self::get_inner(conn, key).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = self.ensure(&mut guard).await?;
        let result = Self::put_inner(conn, key, &value).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }
}
