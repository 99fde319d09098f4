//! Hub and per-connection tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a broadcast is delivered back to the connection that sent it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Deliver to every registered connection, the sender included.
    #[default]
    All,
    /// Deliver to every registered connection except the sender.
    ExcludeSender,
}

/// Limits and timings for the hub and its connections.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue slots per connection.
    pub send_queue_capacity: usize,
    /// Inbound broadcast channel slots shared by all readers.
    pub inbound_capacity: usize,
    /// Read window, refreshed on every probe acknowledgement.
    pub read_timeout: Duration,
    /// Deadline for every write, probes included.
    pub write_timeout: Duration,
    /// Probe period. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Self-delivery policy.
    pub echo: EchoPolicy,
    /// Disconnect log lines allowed per window before suppression.
    pub disconnect_log_burst: u32,
    /// Length of the disconnect log window.
    pub disconnect_log_window: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            send_queue_capacity: 256,
            inbound_capacity: 256,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(54),
            echo: EchoPolicy::All,
            disconnect_log_burst: 50,
            disconnect_log_window: Duration::from_secs(10),
        }
    }
}

/// Reader limits derived from [`HubConfig`].
#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Read window.
    pub read_timeout: Duration,
}

/// Writer timings derived from [`HubConfig`].
#[derive(Clone, Copy, Debug)]
pub struct WriterOptions {
    /// Deadline for every write.
    pub write_timeout: Duration,
    /// Probe period.
    pub ping_interval: Duration,
    /// Most queued messages folded into one frame.
    pub max_batch: usize,
}

impl HubConfig {
    /// Options for a connection's reader.
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            max_message_size: self.max_message_size,
            read_timeout: self.read_timeout,
        }
    }

    /// Options for a connection's writer.
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            write_timeout: self.write_timeout,
            ping_interval: self.ping_interval,
            max_batch: self.send_queue_capacity.max(1),
        }
    }
}
