//! # respkv Sync Client
//!
//! Purpose: Provide a lightweight, synchronous Redis-compatible client with
//! connection pooling to minimize TCP handshake overhead.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Deadline Everywhere**: Every dial, write and read is bounded by the
//!    caller's `Context`.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod context;
mod error;
mod pool;
mod resp;

pub use client::{Client, ClientConfig};
pub use context::{Context, WatchGuard};
pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionPool, Dialer, PoolConfig, PooledConnection, TcpDialer, DEFAULT_POOL_SIZE};
pub use resp::{encode_command, read_reply, Reply, MAX_BULK_LEN, MAX_NESTING_DEPTH};
