//! The coordinator: sole owner of the live connection set.
//!
//! All membership changes and fan-out happen inside [`Hub::run`], one event at
//! a time. Everything else talks to it through a cloneable [`HubHandle`].
//!
//! Events are polled in priority order: shutdown, register, unregister,
//! broadcast, query. Membership changes therefore never wait behind a flood
//! of broadcasts, and a query is answered only once everything queued ahead
//! of it has been applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use metrics::{counter, gauge};
use relay_telemetry::metrics::{
    BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DELIVERIES_TOTAL,
    DISCONNECTIONS_TOTAL, EVICTIONS_TOTAL,
};
use relay_telemetry::{Admission, LogThrottle};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{EchoPolicy, HubConfig};
use crate::connection::{ConnectionEntry, ConnectionId, PushError};
use crate::error::{HubError, Result};

/// Slots for register and query requests.
const CONTROL_CAPACITY: usize = 64;

struct Registration {
    entry: ConnectionEntry,
    ack: oneshot::Sender<Result<()>>,
}

struct Broadcast {
    origin: Option<ConnectionId>,
    payload: Bytes,
}

enum Query {
    Members(oneshot::Sender<Vec<ConnectionId>>),
}

/// Why the hub dropped a connection from the live set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection's reader asked to leave.
    Unregistered,
    /// The outbound queue was full during fan-out.
    QueueFull,
    /// The writer had already stopped consuming.
    WriterGone,
    /// The registering caller disappeared before the registration finished.
    Abandoned,
}

impl RemovalReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::QueueFull => "queue_full",
            Self::WriterGone => "writer_gone",
            Self::Abandoned => "abandoned",
        }
    }
}

/// The coordinator loop and the state only it may touch.
pub struct Hub {
    clients: HashMap<ConnectionId, ConnectionEntry>,
    echo: EchoPolicy,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    query_rx: mpsc::Receiver<Query>,
    active: Arc<AtomicUsize>,
    disconnect_log: Arc<LogThrottle>,
    shutdown: CancellationToken,
}

/// Cloneable request interface to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    query_tx: mpsc::Sender<Query>,
    active: Arc<AtomicUsize>,
    disconnect_log: Arc<LogThrottle>,
}

impl Hub {
    /// Build a hub and its handle. The hub does nothing until [`run`](Self::run).
    ///
    /// The loop exits when `shutdown` is cancelled or every handle is dropped.
    pub fn new(config: &HubConfig, shutdown: CancellationToken) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (query_tx, query_rx) = mpsc::channel(CONTROL_CAPACITY);
        let active = Arc::new(AtomicUsize::new(0));
        let disconnect_log = Arc::new(LogThrottle::new(
            config.disconnect_log_burst,
            config.disconnect_log_window,
        ));

        let hub = Self {
            clients: HashMap::new(),
            echo: config.echo,
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
            active: active.clone(),
            disconnect_log: disconnect_log.clone(),
            shutdown,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            query_tx,
            active,
            disconnect_log,
        };
        (hub, handle)
    }

    /// Build a hub and run it on a new task.
    pub fn spawn(config: &HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, shutdown);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events until shutdown. Closes every remaining queue on exit.
    pub async fn run(mut self) {
        info!(echo = ?self.echo, "hub started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                registration = self.register_rx.recv() => match registration {
                    Some(registration) => self.register(registration),
                    // Every handle holds a register sender, so this is the last one gone.
                    None => break,
                },
                Some(id) = self.unregister_rx.recv() => {
                    let _ = self.remove(&id, RemovalReason::Unregistered);
                }
                Some(message) = self.broadcast_rx.recv() => self.fan_out(message),
                Some(query) = self.query_rx.recv() => self.answer(query),
            }
        }
        self.close_all();
    }

    fn register(&mut self, registration: Registration) {
        let Registration { entry, ack } = registration;
        let id = entry.id().clone();

        if self.clients.contains_key(&id) {
            warn!(conn_id = %id, "duplicate registration rejected");
            drop(entry);
            let _ = ack.send(Err(HubError::DuplicateConnection(id)));
            return;
        }

        let _ = self.clients.insert(id.clone(), entry);
        counter!(CONNECTIONS_TOTAL).increment(1);
        self.publish_count();
        info!(conn_id = %id, clients = self.clients.len(), "client registered");

        if ack.send(Ok(())).is_err() {
            let _ = self.remove(&id, RemovalReason::Abandoned);
        }
    }

    /// Drop an entry, which closes its outbound queue. No-op for unknown ids.
    fn remove(&mut self, id: &ConnectionId, reason: RemovalReason) -> bool {
        let Some(entry) = self.clients.remove(id) else {
            trace!(conn_id = %id, reason = reason.as_str(), "connection already removed");
            return false;
        };
        drop(entry);

        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        if reason == RemovalReason::QueueFull {
            counter!(EVICTIONS_TOTAL).increment(1);
        }
        self.publish_count();
        self.log_removal(id, reason);
        true
    }

    fn fan_out(&mut self, message: Broadcast) {
        let Broadcast { origin, payload } = message;
        let mut delivered: u64 = 0;
        let mut dropped = Vec::new();

        for (id, entry) in &self.clients {
            if self.echo == EchoPolicy::ExcludeSender && origin.as_ref() == Some(id) {
                continue;
            }
            match entry.queue().try_push(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(PushError::Full) => dropped.push((id.clone(), RemovalReason::QueueFull)),
                Err(PushError::Closed) => dropped.push((id.clone(), RemovalReason::WriterGone)),
            }
        }

        counter!(BROADCASTS_TOTAL).increment(1);
        counter!(DELIVERIES_TOTAL).increment(delivered);
        trace!(bytes = payload.len(), delivered, dropped = dropped.len(), "broadcast");

        for (id, reason) in dropped {
            let _ = self.remove(&id, reason);
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Members(reply) => {
                let _ = reply.send(self.clients.keys().cloned().collect());
            }
        }
    }

    fn close_all(&mut self) {
        let closed = self.clients.len();
        self.clients.clear();
        counter!(DISCONNECTIONS_TOTAL, "reason" => "shutdown").increment(closed as u64);
        self.publish_count();
        info!(closed, "hub stopped");
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_count(&self) {
        let count = self.clients.len();
        self.active.store(count, Ordering::Relaxed);
        gauge!(CONNECTIONS_ACTIVE).set(count as f64);
    }

    fn log_removal(&self, id: &ConnectionId, reason: RemovalReason) {
        if !admit_disconnect_log(&self.disconnect_log) {
            return;
        }
        let remaining = self.clients.len();
        match reason {
            RemovalReason::QueueFull => {
                warn!(conn_id = %id, remaining, "evicted slow client: outbound queue full");
            }
            RemovalReason::Unregistered => {
                info!(conn_id = %id, remaining, "client unregistered");
            }
            RemovalReason::WriterGone | RemovalReason::Abandoned => {
                debug!(conn_id = %id, remaining, reason = reason.as_str(), "client removed");
            }
        }
    }
}

impl HubHandle {
    /// Add a connection to the live set.
    ///
    /// Returns once the hub has applied the registration, so anything the
    /// caller broadcasts afterwards is fanned out to this connection too.
    pub async fn register(&self, entry: ConnectionEntry) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.register_tx
            .send(Registration { entry, ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)?
    }

    /// Ask the hub to remove a connection. Safe to call more than once.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.unregister_tx.send(id);
    }

    /// Queue a message for fan-out. Waits while the inbound channel is full.
    pub async fn broadcast(&self, origin: Option<ConnectionId>, payload: Bytes) -> Result<()> {
        self.broadcast_tx
            .send(Broadcast { origin, payload })
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Ids of every registered connection, after all earlier requests are applied.
    pub async fn members(&self) -> Result<Vec<ConnectionId>> {
        let (reply, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Members(reply))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Registered connection count as last published by the hub.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Whether the hub loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.register_tx.is_closed()
    }

    pub(crate) fn disconnect_log(&self) -> &Arc<LogThrottle> {
        &self.disconnect_log
    }
}

/// Whether a disconnect-related line may be logged now. Reports the number
/// of lines dropped since the last admitted one.
pub(crate) fn admit_disconnect_log(throttle: &LogThrottle) -> bool {
    match throttle.admit() {
        Admission::Allowed { suppressed } => {
            if suppressed > 0 {
                warn!(suppressed, "disconnect logging throttled");
            }
            true
        }
        Admission::Suppressed => false,
    }
}
