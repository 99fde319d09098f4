//! Per-connection read loop.
//!
//! The reader forwards every inbound data frame to the hub and is the only
//! task that unregisters its connection. It never writes to the stream.

use std::sync::Arc;

use relay_telemetry::LogThrottle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::ReaderOptions;
use crate::connection::ConnectionState;
use crate::hub::{admit_disconnect_log, HubHandle};
use crate::stream::{CloseReason, Frame, FrameSource, StreamError};

/// Why a reader stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The peer sent a close frame or the stream ended.
    PeerClosed(Option<CloseReason>),
    /// No probe acknowledgement arrived within the read window.
    TimedOut,
    /// An inbound message exceeded the size limit.
    MessageTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// The stream failed.
    Failed(StreamError),
    /// The writer closed the connection first.
    Released,
    /// The hub stopped accepting broadcasts.
    HubStopped,
}

impl ReadOutcome {
    /// Whether this is an ordinary disconnect rather than a fault.
    pub fn is_expected(&self) -> bool {
        match self {
            Self::PeerClosed(None) | Self::Released | Self::HubStopped => true,
            Self::PeerClosed(Some(reason)) => reason.is_expected(),
            Self::TimedOut | Self::MessageTooLarge { .. } | Self::Failed(_) => false,
        }
    }
}

/// Read until the connection ends, then unregister and close it.
pub async fn run_reader<S: FrameSource>(
    mut source: S,
    state: Arc<ConnectionState>,
    hub: HubHandle,
    options: ReaderOptions,
) -> ReadOutcome {
    let outcome = read_loop(&mut source, &state, &hub, options).await;
    hub.unregister(state.id.clone());
    state.close();
    log_outcome(hub.disconnect_log(), &state, &outcome);
    outcome
}

async fn read_loop<S: FrameSource>(
    source: &mut S,
    state: &ConnectionState,
    hub: &HubHandle,
    options: ReaderOptions,
) -> ReadOutcome {
    loop {
        // Re-derived each pass so a pong pushes the deadline out.
        let deadline = state.read_deadline(options.read_timeout);
        let next = tokio::select! {
            biased;
            () = state.closed() => return ReadOutcome::Released,
            next = time::timeout_at(deadline, source.recv()) => next,
        };

        let frame = match next {
            Err(_) => return ReadOutcome::TimedOut,
            Ok(None) => return ReadOutcome::PeerClosed(None),
            Ok(Some(Err(err))) => return ReadOutcome::Failed(err),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Data(payload) => {
                if payload.len() > options.max_message_size {
                    return ReadOutcome::MessageTooLarge {
                        size: payload.len(),
                        limit: options.max_message_size,
                    };
                }
                let sent = tokio::select! {
                    biased;
                    () = state.closed() => return ReadOutcome::Released,
                    sent = hub.broadcast(Some(state.id.clone()), payload) => sent,
                };
                if sent.is_err() {
                    return ReadOutcome::HubStopped;
                }
            }
            Frame::Pong(_) => state.touch(),
            Frame::Ping(_) => {}
            Frame::Close(reason) => return ReadOutcome::PeerClosed(reason),
        }
    }
}

fn log_outcome(throttle: &LogThrottle, state: &ConnectionState, outcome: &ReadOutcome) {
    if outcome.is_expected() {
        debug!(conn_id = %state.id, outcome = ?outcome, age = ?state.age(), "reader stopped");
        return;
    }
    if !admit_disconnect_log(throttle) {
        return;
    }
    match outcome {
        ReadOutcome::TimedOut => {
            info!(conn_id = %state.id, idle = ?state.last_activity().elapsed(), "read deadline expired");
        }
        ReadOutcome::MessageTooLarge { size, limit } => {
            warn!(conn_id = %state.id, size, limit, "inbound message too large");
        }
        ReadOutcome::Failed(err) => {
            warn!(conn_id = %state.id, error = %err, "read failed");
        }
        ReadOutcome::PeerClosed(Some(reason)) => {
            warn!(
                conn_id = %state.id,
                code = reason.code,
                reason = %reason.reason,
                "unexpected close"
            );
        }
        ReadOutcome::PeerClosed(None) | ReadOutcome::Released | ReadOutcome::HubStopped => {}
    }
}
