//! # Connection Pool
//!
//! Purpose: Reuse TCP connections across calls to avoid per-call dial cost,
//! while never handing the same socket to two callers at once.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable idle connections.
//! 2. **Lock-Free Handoff**: Idle connections live in a bounded channel, so
//!    acquire and release never take a lock around a mutable list.
//! 3. **Dial on Miss**: An empty pool dials instead of waiting for a release;
//!    capacity only bounds what is retained.
//! 4. **Discard on Doubt**: A connection that saw an I/O or framing error is
//!    closed, never returned, since its frame position is unknown.

use std::borrow::Cow;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_reply, Reply};

/// Default number of idle connections retained by the pool.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379" or ":6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub pool_size: usize,
    /// Upper bound for a dial, applied even without a context deadline.
    pub connect_timeout: Option<Duration>,
    /// Upper bound for one request/response exchange, applied even without a
    /// context deadline.
    pub io_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: None,
            io_timeout: None,
        }
    }
}

/// Factory for new transport connections.
pub trait Dialer: Send + Sync {
    /// Opens a TCP stream to `addr`, giving up after `timeout` when set.
    fn dial(&self, addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream>;
}

/// Plain TCP dialer.
///
/// Resolves host names and tries each resolved address in turn within the
/// time budget. A bare `:port` dials the loopback interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let target = normalize_addr(addr);
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut last_err = None;

        for candidate in target.to_socket_addrs()? {
            let attempt = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "dial deadline exceeded"));
                    }
                    TcpStream::connect_timeout(&candidate, left)
                }
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to no socket addresses")
        }))
    }
}

fn normalize_addr(addr: &str) -> Cow<'_, str> {
    if addr.starts_with(':') {
        Cow::Owned(format!("127.0.0.1{}", addr))
    } else {
        Cow::Borrowed(addr)
    }
}

struct PoolInner {
    config: PoolConfig,
    dialer: Arc<dyn Dialer>,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool that dials with `dialer`. No connection is opened yet.
    pub fn new(config: PoolConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (idle_tx, idle_rx) = bounded(config.pool_size);
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                dialer,
                idle_tx,
                idle_rx,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Number of idle connections currently retained.
    pub fn idle_len(&self) -> usize {
        self.inner.idle_rx.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Lends a connection: an idle one if available, otherwise a fresh dial
    /// bounded by the context deadline.
    ///
    /// Never waits for another caller to release a connection.
    pub fn acquire(&self, ctx: &Context) -> ClientResult<PooledConnection> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }
        ctx.check()?;

        if let Ok(conn) = self.inner.idle_rx.try_recv() {
            trace!(conn = conn.id, "reusing idle connection");
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        let conn = self.dial(ctx)?;
        // The dial itself cannot be interrupted; honor a cancel that landed meanwhile.
        if let Err(err) = ctx.check() {
            self.release(conn, true);
            return Err(err);
        }
        Ok(PooledConnection::new(self.inner.clone(), conn))
    }

    /// Takes back a connection. Healthy connections are retained while there
    /// is room; everything else is closed. Never blocks.
    pub(crate) fn release(&self, conn: Connection, healthy: bool) {
        if !healthy {
            debug!(conn = conn.id, "discarding unhealthy connection");
            conn.close();
            return;
        }
        if self.is_closed() {
            trace!(conn = conn.id, "pool closed, closing released connection");
            conn.close();
            return;
        }

        match self.inner.idle_tx.try_send(conn) {
            Ok(()) => {
                // A concurrent close may have drained before our send landed.
                if self.is_closed() {
                    self.drain_idle();
                }
            }
            Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => {
                trace!(conn = conn.id, "idle store full, closing surplus connection");
                conn.close();
            }
        }
    }

    /// Dials until `count` idle connections are retained, capped by the pool
    /// size. Returns how many connections were added.
    pub fn warm_up(&self, ctx: &Context, count: usize) -> ClientResult<usize> {
        let target = count.min(self.inner.config.pool_size);
        let mut added = 0;
        while self.idle_len() < target {
            if self.is_closed() {
                return Err(ClientError::PoolClosed);
            }
            let conn = self.dial(ctx)?;
            match self.inner.idle_tx.try_send(conn) {
                Ok(()) => added += 1,
                Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => {
                    conn.close();
                    break;
                }
            }
        }
        debug!(added, idle = self.idle_len(), "pool warmed up");
        Ok(added)
    }

    /// Closes every idle connection and rejects further acquires.
    ///
    /// Connections currently lent out are closed when they are released.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.drain_idle();
        debug!(closed, "connection pool closed");
    }

    fn drain_idle(&self) -> usize {
        let mut closed = 0;
        while let Ok(conn) = self.inner.idle_rx.try_recv() {
            conn.close();
            closed += 1;
        }
        closed
    }

    fn dial(&self, ctx: &Context) -> ClientResult<Connection> {
        let timeout = ctx.timeout_within(self.inner.config.connect_timeout)?;
        let addr = &self.inner.config.addr;
        let stream = self.inner.dialer.dial(addr, timeout).map_err(|source| {
            if ctx.is_cancelled() {
                ClientError::Cancelled
            } else {
                ClientError::Dial {
                    addr: addr.clone(),
                    source,
                }
            }
        })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, addr = %addr, "dialed new connection");
        Connection::new(id, stream)
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// The connection goes back as healthy unless an error that leaves the frame
/// position unknown was observed while it was held.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    healthy: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            healthy: true,
        }
    }

    /// Identifier of the underlying connection, stable for its lifetime.
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.id)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Forces the connection to be discarded on release.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Executes one command and returns the decoded reply.
    pub fn exec(&mut self, ctx: &Context, args: &[&[u8]]) -> ClientResult<Reply> {
        let io_timeout = self.pool.config.io_timeout;
        let Some(conn) = self.conn.as_mut() else {
            return Err(ClientError::protocol("connection already released"));
        };
        let response = conn.exec(ctx, args, io_timeout);
        self.settle(ctx, &response);
        response
    }

    /// Decides whether the connection may go back to the idle store after a call.
    fn settle(&mut self, ctx: &Context, response: &ClientResult<Reply>) {
        match response {
            Err(err) if err.is_connection_fatal() => {
                warn!(conn = self.id(), error = %err, "connection failed, it will be discarded");
                self.healthy = false;
            }
            // A cancel landing after the reply was read still shuts the socket down.
            _ if ctx.is_cancelled() => {
                debug!(conn = self.id(), "context cancelled during call, discarding connection");
                self.healthy = false;
            }
            _ => {}
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };
        pool.release(conn, self.healthy);
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub(crate) struct Connection {
    id: u64,
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<DeadlineStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn new(id: u64, stream: TcpStream) -> ClientResult<Self> {
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        Ok(Connection {
            id,
            reader: BufReader::new(DeadlineStream {
                stream,
                deadline: None,
            }),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn exec(&mut self, ctx: &Context, args: &[&[u8]], io_timeout: Option<Duration>) -> ClientResult<Reply> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf)?;
        self.round_trip(ctx, io_timeout).map_err(|err| ctx.classify(err))
    }

    fn round_trip(&mut self, ctx: &Context, io_timeout: Option<Duration>) -> ClientResult<Reply> {
        if !self.reader.buffer().is_empty() {
            return Err(ClientError::protocol("unsolicited bytes buffered before request"));
        }
        let _watch = ctx.watch(&self.reader.get_ref().stream)?;

        // One absolute deadline covers the write and every fill of the reply.
        let stream = self.reader.get_mut();
        stream.deadline = ctx.deadline_within(io_timeout)?;
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        trace!(conn = self.id, bytes = self.write_buf.len(), "command written");

        read_reply(&mut self.reader, &mut self.line_buf)
    }

    fn close(self) {
        let _ = self.reader.get_ref().stream.shutdown(Shutdown::Both);
    }
}

/// TCP stream bounded by an absolute deadline.
///
/// Socket timeouts apply per syscall, so they are re-armed from the time left
/// before every read and write. A peer trickling bytes cannot stretch a frame
/// past the deadline.
struct DeadlineStream {
    stream: TcpStream,
    deadline: Option<Instant>,
}

impl DeadlineStream {
    fn time_left(&self) -> io::Result<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
        }
        Ok(Some(left))
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.time_left()?;
        self.stream.set_read_timeout(left)?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let left = self.time_left()?;
        self.stream.set_write_timeout(left)?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
