//! In-memory stream halves for exercising readers and writers without sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::stream::{CloseReason, Frame, FrameSink, FrameSource, StreamError};

#[derive(Default)]
struct SinkControls {
    fail: AtomicBool,
    stall: AtomicBool,
    closed: AtomicBool,
}

/// Read half fed by a [`MockPeer`].
pub(crate) struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<Frame, StreamError>>,
}

/// Write half observed by a [`MockPeer`].
pub(crate) struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
    controls: Arc<SinkControls>,
}

/// The remote end of a mock stream.
pub(crate) struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Result<Frame, StreamError>>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    controls: Arc<SinkControls>,
}

pub(crate) fn mock_stream() -> (MockSource, MockSink, MockPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let controls = Arc::new(SinkControls::default());
    (
        MockSource { rx: in_rx },
        MockSink {
            tx: out_tx,
            controls: controls.clone(),
        },
        MockPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            controls,
        },
    )
}

#[async_trait]
impl FrameSource for MockSource {
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>> {
        self.rx.recv().await
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<(), StreamError> {
        if self.controls.stall.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.controls.closed.load(Ordering::Relaxed) {
            return Err(StreamError::Closed);
        }
        if self.controls.fail.load(Ordering::Relaxed) {
            return Err(StreamError::Io("broken pipe".into()));
        }
        self.tx.send(frame).map_err(|_| StreamError::Closed)
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.controls.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockPeer {
    pub(crate) fn send_frame(&self, frame: Frame) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(frame));
        }
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.send_frame(Frame::Data(Bytes::copy_from_slice(text.as_bytes())));
    }

    pub(crate) fn send_pong(&self) {
        self.send_frame(Frame::Pong(Bytes::new()));
    }

    pub(crate) fn send_close(&self, code: u16) {
        self.send_frame(Frame::Close(Some(CloseReason::new(code, ""))));
    }

    pub(crate) fn send_error(&self, err: StreamError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(err));
        }
    }

    /// End the inbound stream without a close frame.
    pub(crate) fn hang_up(&mut self) {
        self.inbound = None;
    }

    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    pub(crate) fn try_next_frame(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    pub(crate) fn fail_writes(&self) {
        self.controls.fail.store(true, Ordering::Relaxed);
    }

    pub(crate) fn stall_writes(&self) {
        self.controls.stall.store(true, Ordering::Relaxed);
    }

    pub(crate) fn sink_closed(&self) -> bool {
        self.controls.closed.load(Ordering::Relaxed)
    }
}
