//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking GET/SET API over RESP2 with pooled
//! connections and per-call deadlines.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Error Classes Stay Apart**: Server error replies never look like
//!    transport failures, and an absent key never looks like an empty value.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, Dialer, PoolConfig, TcpDialer, DEFAULT_POOL_SIZE};
use crate::resp::Reply;

/// Configuration for the client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379" or ":6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub pool_size: usize,
    /// Optional upper bound for dials, on top of the call deadline.
    pub connect_timeout: Option<Duration>,
    /// Optional upper bound for one whole exchange, on top of the call deadline.
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: None,
            io_timeout: None,
        }
    }
}

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, executes one command, and hands the
/// connection back. Calls from many threads run on distinct connections.
pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    /// Creates a client for `addr` with default configuration.
    ///
    /// Nothing is dialed until the first call.
    pub fn new(ctx: &Context, addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(ctx, config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(ctx: &Context, config: ClientConfig) -> ClientResult<Self> {
        Self::with_dialer(ctx, config, Arc::new(TcpDialer))
    }

    /// Creates a client that opens connections through `dialer`.
    pub fn with_dialer(ctx: &Context, config: ClientConfig, dialer: Arc<dyn Dialer>) -> ClientResult<Self> {
        ctx.check()?;
        let pool = ConnectionPool::new(
            PoolConfig {
                addr: config.addr,
                pool_size: config.pool_size,
                connect_timeout: config.connect_timeout,
                io_timeout: config.io_timeout,
            },
            dialer,
        );
        Ok(Client { pool })
    }

    pub fn addr(&self) -> &str {
        self.pool.addr()
    }

    /// Number of idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_len()
    }

    /// Pre-dials up to `count` idle connections (capped by the pool size).
    pub fn warm_up(&self, ctx: &Context, count: usize) -> ClientResult<usize> {
        self.pool.warm_up(ctx, count)
    }

    /// Fetches the value stored at `key`.
    ///
    /// Returns `Ok(None)` when the key does not exist and `Ok(Some(vec![]))`
    /// when it holds an empty string.
    pub fn get(&self, ctx: &Context, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.execute(ctx, &[b"GET", key])? {
            Reply::Bulk(data) => Ok(data),
            Reply::Error(message) => Err(ClientError::Server { message }),
            other => Err(ClientError::UnexpectedReply(format!(
                "GET answered with {}",
                other.kind()
            ))),
        }
    }

    /// Stores `value` at `key`, overwriting any previous value.
    pub fn set(&self, ctx: &Context, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.execute(ctx, &[b"SET", key, value])? {
            Reply::Simple(status) if status == "OK" => Ok(()),
            Reply::Simple(status) => Err(ClientError::UnexpectedReply(format!(
                "expected OK from SET but got: {}",
                status
            ))),
            // Some servers echo a value back; accepted without validation.
            Reply::Bulk(_) => Ok(()),
            Reply::Error(message) => Err(ClientError::Server { message }),
            other => Err(ClientError::UnexpectedReply(format!(
                "SET answered with {}",
                other.kind()
            ))),
        }
    }

    /// Sends an arbitrary command and returns the raw reply.
    ///
    /// Error replies come back as `Reply::Error`; only transport and framing
    /// failures are returned as `Err`.
    pub fn execute(&self, ctx: &Context, args: &[&[u8]]) -> ClientResult<Reply> {
        trace!(state = "acquiring", "client call");
        let mut conn = self.pool.acquire(ctx)?;
        trace!(state = "writing", conn = conn.id(), "client call");
        let reply = conn.exec(ctx, args);
        let state = if conn.is_healthy() { "releasing" } else { "failed" };
        trace!(state, conn = conn.id(), "client call");
        reply
    }

    /// Closes all pooled connections. Later calls fail with `PoolClosed`.
    ///
    /// Calls already in flight finish normally; their connections are closed
    /// on release. Closing twice is a no-op.
    pub fn close(&self) -> ClientResult<()> {
        self.pool.close();
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pool.close();
    }
}
