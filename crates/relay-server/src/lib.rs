//! # relay-server
//!
//! Axum front end for the relay hub.
//!
//! - `GET /ws` upgrades to a WebSocket (after an `Origin` check) and hands the
//!   socket to [`relay_hub::serve`]
//! - `GET /health` reports uptime and the live connection count
//! - `GET /metrics` renders the Prometheus recorder, when one is installed
//!
//! [`RelayServer`] owns the hub task and a [`ShutdownCoordinator`] that stops
//! both the listener and the hub.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
pub use ws::origin_allowed;
