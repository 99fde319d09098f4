//! Transport-neutral view of an established bidirectional message stream.
//!
//! The hub never sees sockets. A transport adapter splits its connection into
//! a [`FrameSource`] (read half) and a [`FrameSink`] (write half); the reader
//! and writer tasks drive those halves independently.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time;

/// One unit of traffic on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Application payload. Opaque to the hub.
    Data(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness probe acknowledgement.
    Pong(Bytes),
    /// Close notification, with the peer's reason when one was sent.
    Close(Option<CloseReason>),
}

/// Close code and reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// Numeric close code (RFC 6455 numbering).
    pub code: u16,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

impl CloseReason {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (page navigation, server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;

    /// Build a close reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close reason sent when the hub closes a connection's queue.
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    /// Whether this code belongs to an ordinary disconnect.
    pub fn is_expected(&self) -> bool {
        matches!(self.code, Self::NORMAL | Self::GOING_AWAY | Self::ABNORMAL)
    }
}

/// Failure reading from or writing to a stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Transport-level failure (reset, broken pipe, TLS error).
    #[error("stream I/O error: {0}")]
    Io(String),
    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The stream was already closed.
    #[error("stream closed")]
    Closed,
    /// The operation did not complete before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next frame. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame and flush it.
    async fn send(&mut self, frame: Frame) -> Result<(), StreamError>;

    /// Close the underlying stream. Must tolerate an already-closed stream.
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Send a frame, failing with [`StreamError::Timeout`] after `wait`.
pub async fn send_with_deadline<K: FrameSink + ?Sized>(
    sink: &mut K,
    frame: Frame,
    wait: Duration,
) -> Result<(), StreamError> {
    match time::timeout(wait, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Timeout(wait)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_stream;

    #[test]
    fn expected_close_codes() {
        assert!(CloseReason::new(CloseReason::NORMAL, "").is_expected());
        assert!(CloseReason::new(CloseReason::GOING_AWAY, "bye").is_expected());
        assert!(CloseReason::new(CloseReason::ABNORMAL, "").is_expected());
    }

    #[test]
    fn unexpected_close_codes() {
        assert!(!CloseReason::new(1009, "too big").is_expected());
        assert!(!CloseReason::new(1002, "protocol").is_expected());
        assert!(!CloseReason::new(4000, "app").is_expected());
    }

    #[test]
    fn normal_close_reason_has_empty_text() {
        let reason = CloseReason::normal();
        assert_eq!(reason.code, 1000);
        assert!(reason.reason.is_empty());
    }

    #[test]
    fn stream_error_display() {
        assert_eq!(StreamError::Closed.to_string(), "stream closed");
        assert!(StreamError::Io("reset".into()).to_string().contains("reset"));
        let err = StreamError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10s"));
    }

    #[tokio::test]
    async fn send_with_deadline_passes_frame_through() {
        let (_source, mut sink, mut peer) = mock_stream();
        send_with_deadline(&mut sink, Frame::Data(Bytes::from_static(b"hi")), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Data(Bytes::from_static(b"hi"))));
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_deadline_times_out_on_stalled_sink() {
        let (_source, mut sink, peer) = mock_stream();
        peer.stall_writes();
        let err = send_with_deadline(&mut sink, Frame::Ping(Bytes::new()), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err, StreamError::Timeout(Duration::from_secs(10)));
    }
}
