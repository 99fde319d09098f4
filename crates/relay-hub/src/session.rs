//! Wires an established stream into the hub.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::config::HubConfig;
use crate::connection::{ConnectionEntry, ConnectionId, ConnectionState, OutboundQueue};
use crate::error::Result;
use crate::hub::HubHandle;
use crate::reader::{run_reader, ReadOutcome};
use crate::stream::{FrameSink, FrameSource};
use crate::writer::{run_writer, WriteOutcome};

/// The two tasks serving one connection.
pub struct ConnectionTasks {
    /// Id the connection was registered under.
    pub id: ConnectionId,
    /// Reader task.
    pub reader: JoinHandle<ReadOutcome>,
    /// Writer task.
    pub writer: JoinHandle<WriteOutcome>,
}

impl ConnectionTasks {
    /// Wait for both tasks. A task that panicked or was aborted yields `None`.
    pub async fn join(self) -> (Option<ReadOutcome>, Option<WriteOutcome>) {
        let (reader, writer) = tokio::join!(self.reader, self.writer);
        (reader.ok(), writer.ok())
    }
}

/// Register a new connection and start its reader and writer.
///
/// On failure nothing is spawned and the sink is closed.
pub async fn serve<R, W>(
    source: R,
    mut sink: W,
    hub: &HubHandle,
    config: &HubConfig,
) -> Result<ConnectionTasks>
where
    R: FrameSource,
    W: FrameSink,
{
    let state = Arc::new(ConnectionState::new(ConnectionId::new()));
    let (queue, outbound) = OutboundQueue::bounded(config.send_queue_capacity);

    if let Err(err) = hub.register(ConnectionEntry::new(state.clone(), queue)).await {
        debug!(conn_id = %state.id, error = %err, "registration refused");
        let _ = time::timeout(config.write_timeout, sink.close()).await;
        return Err(err);
    }

    let writer = tokio::spawn(run_writer(
        sink,
        outbound,
        state.clone(),
        config.writer_options(),
        hub.disconnect_log().clone(),
    ));
    let reader = tokio::spawn(run_reader(
        source,
        state.clone(),
        hub.clone(),
        config.reader_options(),
    ));

    Ok(ConnectionTasks {
        id: state.id.clone(),
        reader,
        writer,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::EchoPolicy;
    use crate::error::HubError;
    use crate::hub::Hub;
    use crate::stream::{CloseReason, Frame};
    use crate::testing::mock_stream;

    fn spawn_hub(config: &HubConfig) -> (HubHandle, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (hub, _task) = Hub::spawn(config, shutdown.clone());
        (hub, shutdown)
    }

    #[tokio::test]
    async fn message_reaches_every_session() {
        let config = HubConfig::default();
        let (hub, _shutdown) = spawn_hub(&config);

        let (source_a, sink_a, mut peer_a) = mock_stream();
        let (source_b, sink_b, mut peer_b) = mock_stream();
        let a = serve(source_a, sink_a, &hub, &config).await.unwrap();
        let b = serve(source_b, sink_b, &hub, &config).await.unwrap();
        assert_eq!(hub.connection_count(), 2);
        assert_ne!(a.id, b.id);

        peer_a.send_text("hello");
        let hello = Some(Frame::Data(Bytes::from_static(b"hello")));
        assert_eq!(peer_b.next_frame().await, hello);
        assert_eq!(peer_a.next_frame().await, hello);
    }

    #[tokio::test]
    async fn exclude_sender_sessions() {
        let config = HubConfig {
            echo: EchoPolicy::ExcludeSender,
            ..HubConfig::default()
        };
        let (hub, _shutdown) = spawn_hub(&config);

        let (source_a, sink_a, mut peer_a) = mock_stream();
        let (source_b, sink_b, mut peer_b) = mock_stream();
        let _a = serve(source_a, sink_a, &hub, &config).await.unwrap();
        let _b = serve(source_b, sink_b, &hub, &config).await.unwrap();

        peer_a.send_text("hi");
        assert_eq!(
            peer_b.next_frame().await,
            Some(Frame::Data(Bytes::from_static(b"hi")))
        );
        let _ = hub.members().await.unwrap();
        assert_eq!(peer_a.try_next_frame(), None);
    }

    #[tokio::test]
    async fn peer_hang_up_tears_down_both_tasks() {
        let config = HubConfig::default();
        let (hub, _shutdown) = spawn_hub(&config);

        let (source, sink, mut peer) = mock_stream();
        let tasks = serve(source, sink, &hub, &config).await.unwrap();
        peer.hang_up();

        let (read, write) = tasks.join().await;
        assert_eq!(read, Some(ReadOutcome::PeerClosed(None)));
        assert_matches!(write, Some(WriteOutcome::Released | WriteOutcome::QueueClosed));
        assert!(peer.sink_closed());
        assert!(hub.members().await.unwrap().is_empty());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn hub_shutdown_closes_sessions_gracefully() {
        let config = HubConfig::default();
        let (hub, shutdown) = spawn_hub(&config);

        let (source, sink, mut peer) = mock_stream();
        let tasks = serve(source, sink, &hub, &config).await.unwrap();
        shutdown.cancel();

        assert_eq!(
            peer.next_frame().await,
            Some(Frame::Close(Some(CloseReason::normal())))
        );
        let (read, write) = tasks.join().await;
        assert_eq!(write, Some(WriteOutcome::QueueClosed));
        assert_eq!(read, Some(ReadOutcome::Released));
    }

    #[tokio::test]
    async fn stopped_hub_refuses_and_closes_sink() {
        let config = HubConfig::default();
        let (hub, shutdown) = spawn_hub(&config);
        shutdown.cancel();
        while !hub.is_stopped() {
            tokio::task::yield_now().await;
        }

        let (source, sink, peer) = mock_stream();
        let err = serve(source, sink, &hub, &config).await.err();
        assert_eq!(err, Some(HubError::Stopped));
        assert!(peer.sink_closed());
    }
}
