//! Per-connection state, identity, and outbound queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Unique, never-reused connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh identifier.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State shared by a connection's reader and writer.
///
/// Closing is one-way: once [`close`](Self::close) is called both tasks
/// observe it and release their half of the stream.
pub struct ConnectionState {
    /// Connection identifier.
    pub id: ConnectionId,
    /// When the connection was established.
    pub connected_at: Instant,
    /// Last time the peer acknowledged a probe (or connection start).
    last_activity: Mutex<Instant>,
    closed: CancellationToken,
}

impl ConnectionState {
    /// Create state for a newly established connection.
    pub fn new(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            connected_at: now,
            last_activity: Mutex::new(now),
            closed: CancellationToken::new(),
        }
    }

    /// Record a probe acknowledgement from the peer.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// When the peer was last known to be alive.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Deadline for the next read given the configured read window.
    pub fn read_deadline(&self, window: Duration) -> Instant {
        self.last_activity() + window
    }

    /// Signal both halves to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed by either half.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Receiving end of an outbound queue, drained by the writer.
pub type OutboundReceiver = mpsc::Receiver<Bytes>;

/// Why a message could not be enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushError {
    /// The queue is at capacity; the consumer is too slow.
    Full,
    /// The writer has gone away.
    Closed,
}

/// Producing end of a connection's bounded outbound queue.
///
/// There is exactly one producer per queue. Dropping it closes the queue:
/// the writer drains whatever is buffered and then sees the end.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Bytes>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn bounded(capacity: usize) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, payload: Bytes) -> Result<(), PushError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// The hub's record of one live connection.
pub struct ConnectionEntry {
    state: Arc<ConnectionState>,
    queue: OutboundQueue,
}

impl ConnectionEntry {
    /// Pair a connection with the producing end of its queue.
    pub fn new(state: Arc<ConnectionState>, queue: OutboundQueue) -> Self {
        Self { state, queue }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.state.id
    }

    /// Outbound queue producer.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }
}
