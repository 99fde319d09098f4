//! Per-connection write loop.
//!
//! The writer is the only task that writes to its stream. It drains the
//! outbound queue, sends liveness probes, and closes the stream when the
//! hub drops the connection.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use relay_telemetry::LogThrottle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::WriterOptions;
use crate::connection::{ConnectionState, OutboundReceiver};
use crate::hub::admit_disconnect_log;
use crate::stream::{send_with_deadline, CloseReason, Frame, FrameSink, StreamError};

/// Why a writer stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The hub closed the queue; a close frame was sent.
    QueueClosed,
    /// Writing a message failed or missed its deadline.
    WriteFailed(StreamError),
    /// Writing a liveness probe failed or missed its deadline.
    ProbeFailed(StreamError),
    /// The reader closed the connection first.
    Released,
}

impl WriteOutcome {
    /// Whether this is an ordinary disconnect rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::QueueClosed | Self::Released)
    }
}

/// Write until the queue closes or a write fails, then close the stream.
///
/// Never unregisters: closing the shared state wakes the reader, which does.
pub async fn run_writer<K: FrameSink>(
    mut sink: K,
    mut queue: OutboundReceiver,
    state: Arc<ConnectionState>,
    options: WriterOptions,
    disconnect_log: Arc<LogThrottle>,
) -> WriteOutcome {
    let outcome = write_loop(&mut sink, &mut queue, &state, options).await;
    state.close();

    match time::timeout(options.write_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(conn_id = %state.id, error = %err, "stream close failed"),
        Err(_) => debug!(conn_id = %state.id, "stream close timed out"),
    }

    match &outcome {
        WriteOutcome::WriteFailed(err) | WriteOutcome::ProbeFailed(err) => {
            if admit_disconnect_log(&disconnect_log) {
                let probe = matches!(outcome, WriteOutcome::ProbeFailed(_));
                warn!(conn_id = %state.id, error = %err, probe, "write failed");
            }
        }
        WriteOutcome::QueueClosed | WriteOutcome::Released => {
            debug!(conn_id = %state.id, outcome = ?outcome, "writer stopped");
        }
    }
    outcome
}

async fn write_loop<K: FrameSink>(
    sink: &mut K,
    queue: &mut OutboundReceiver,
    state: &ConnectionState,
    options: WriterOptions,
) -> WriteOutcome {
    let mut heartbeat = time::interval_at(
        Instant::now() + options.ping_interval,
        options.ping_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = state.closed() => return WriteOutcome::Released,
            _ = heartbeat.tick() => {
                let probe = Frame::Ping(Bytes::new());
                if let Err(err) = send_with_deadline(sink, probe, options.write_timeout).await {
                    return WriteOutcome::ProbeFailed(err);
                }
            }
            next = queue.recv() => {
                let Some(first) = next else {
                    let close = Frame::Close(Some(CloseReason::normal()));
                    if let Err(err) = send_with_deadline(sink, close, options.write_timeout).await {
                        debug!(conn_id = %state.id, error = %err, "close frame not delivered");
                    }
                    return WriteOutcome::QueueClosed;
                };
                let frame = Frame::Data(coalesce(first, queue, options.max_batch));
                if let Err(err) = send_with_deadline(sink, frame, options.write_timeout).await {
                    return WriteOutcome::WriteFailed(err);
                }
            }
        }
    }
}

/// Fold already-buffered messages into `first`, newline separated, up to
/// `max_batch` messages in total. A lone message is returned untouched.
fn coalesce(first: Bytes, queue: &mut OutboundReceiver, max_batch: usize) -> Bytes {
    let mut batch: Option<BytesMut> = None;
    for _ in 1..max_batch {
        let Ok(next) = queue.try_recv() else {
            break;
        };
        let buf = batch.get_or_insert_with(|| {
            let mut buf = BytesMut::with_capacity(first.len() + 1 + next.len());
            buf.extend_from_slice(&first);
            buf
        });
        buf.extend_from_slice(b"\n");
        buf.extend_from_slice(&next);
    }
    batch.map_or(first, BytesMut::freeze)
}
