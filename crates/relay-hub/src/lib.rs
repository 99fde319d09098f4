//! # relay-hub
//!
//! Transport-neutral core of the relay: a single coordinator task that owns
//! the set of live connections, plus the reader and writer tasks that serve
//! each connection.
//!
//! - **Coordinator** ([`hub`]): registration, unregistration, and fan-out,
//!   serialized through one loop. Slow consumers are evicted, never waited on.
//! - **Connections** ([`connection`]): ids, shared per-connection state, and
//!   the bounded outbound queue.
//! - **Reader / Writer** ([`reader`], [`writer`]): read deadline and size
//!   cap on the way in; coalescing, heartbeats, and write deadlines on the
//!   way out.
//! - **Streams** ([`stream`]): the [`FrameSource`] / [`FrameSink`] traits a
//!   transport implements.
//! - **Sessions** ([`session`]): [`serve`] glues a stream to the hub.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod reader;
pub mod session;
pub mod stream;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{EchoPolicy, HubConfig, ReaderOptions, WriterOptions};
pub use connection::{ConnectionEntry, ConnectionId, ConnectionState, OutboundQueue, PushError};
pub use error::{HubError, Result};
pub use hub::{Hub, HubHandle, RemovalReason};
pub use reader::ReadOutcome;
pub use session::{serve, ConnectionTasks};
pub use stream::{CloseReason, Frame, FrameSink, FrameSource, StreamError};
pub use writer::WriteOutcome;
