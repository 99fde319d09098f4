//! Hub error types.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors returned by [`HubHandle`](crate::hub::HubHandle) requests.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The hub loop has exited; no further requests are processed.
    #[error("hub is not running")]
    Stopped,
    /// A connection with this id is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Result type for hub requests.
pub type Result<T> = std::result::Result<T, HubError>;
