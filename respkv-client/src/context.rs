//! # Call Context
//!
//! Purpose: Carry a caller's deadline and cancellation signal into every
//! blocking dial, write and read the client performs.
//!
//! ## Design Principles
//! 1. **Explicit Threading**: Every blocking call takes a `&Context`; socket
//!    timeouts are derived from it right before the operation.
//! 2. **Shared Handle**: Clones share state, so another thread can cancel.
//! 3. **Prompt Wakeup**: Cancelling shuts down the sockets registered with the
//!    context, which unblocks a read or write stuck in the kernel.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ClientError, ClientResult};

struct ContextInner {
    deadline: Option<Instant>,
    cancelled: AtomicBool,
    next_watch: AtomicU64,
    watched: Mutex<HashMap<u64, TcpStream>>,
}

/// Deadline and cancellation handle for one or more client calls.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// A context without deadline. It is only cancelled explicitly.
    pub fn background() -> Self {
        Self::build(None)
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                deadline,
                cancelled: AtomicBool::new(false),
                next_watch: AtomicU64::new(0),
                watched: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the context and wakes every blocked operation using it.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let watched: Vec<TcpStream> = match self.inner.watched.lock() {
            Ok(mut map) => map.drain().map(|(_, stream)| stream).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, stream)| stream).collect(),
        };
        debug!(sockets = watched.len(), "context cancelled");
        for stream in watched {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Checks the context without consuming time budget.
    pub fn check(&self) -> ClientResult<()> {
        self.remaining().map(|_| ())
    }

    /// Time left before the deadline.
    ///
    /// `Ok(None)` means no deadline. Once the deadline has passed this returns
    /// `Err(Timeout)`; once cancelled, `Err(Cancelled)`. A returned duration is
    /// never zero, so it can be handed to socket timeout setters directly.
    pub fn remaining(&self) -> ClientResult<Option<Duration>> {
        if self.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        match self.inner.deadline {
            None => Ok(None),
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(ClientError::Timeout)
                } else {
                    Ok(Some(left))
                }
            }
        }
    }

    /// Remaining time, capped by `limit` when one is configured.
    pub(crate) fn timeout_within(&self, limit: Option<Duration>) -> ClientResult<Option<Duration>> {
        let remaining = self.remaining()?;
        // Socket timeout setters reject a zero duration.
        let limit = limit.filter(|d| !d.is_zero());
        Ok(match (remaining, limit) {
            (Some(left), Some(limit)) => Some(left.min(limit)),
            (left, None) => left,
            (None, limit) => limit,
        })
    }

    /// Absolute deadline for one exchange: the context deadline, moved
    /// earlier when `limit` ends first.
    pub(crate) fn deadline_within(&self, limit: Option<Duration>) -> ClientResult<Option<Instant>> {
        let now = Instant::now();
        Ok(self.timeout_within(limit)?.and_then(|left| now.checked_add(left)))
    }

    /// Registers `stream` so that `cancel` can interrupt I/O on it.
    ///
    /// The registration lasts until the returned guard is dropped.
    pub fn watch(&self, stream: &TcpStream) -> ClientResult<WatchGuard> {
        let clone = stream.try_clone()?;
        let id = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        match self.inner.watched.lock() {
            Ok(mut map) => map.insert(id, clone),
            Err(poisoned) => poisoned.into_inner().insert(id, clone),
        };
        let guard = WatchGuard {
            ctx: self.inner.clone(),
            id,
        };
        // A cancel racing the insert may have drained the map already.
        if self.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        Ok(guard)
    }

    /// Maps an I/O error raised under this context to the client taxonomy.
    pub(crate) fn classify(&self, err: ClientError) -> ClientError {
        if self.is_cancelled() {
            return ClientError::Cancelled;
        }
        match err {
            ClientError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                ClientError::Timeout
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Keeps a socket registered with a [`Context`] while it is alive.
pub struct WatchGuard {
    ctx: Arc<ContextInner>,
    id: u64,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let removed = match self.ctx.watched.lock() {
            Ok(mut map) => map.remove(&self.id),
            Err(poisoned) => poisoned.into_inner().remove(&self.id),
        };
        drop(removed);
    }
}
