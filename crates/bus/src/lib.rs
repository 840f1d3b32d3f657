//! Bootstrap bus for fshare peers.
//!
//! The bus is a WebSocket publish/subscribe relay: every peer subscribes to a
//! shared channel under its identity, publishes signaling messages to it, and
//! is told when other subscribers join or leave. [`RelayServer`] is the relay;
//! [`BusClient`] connects a peer to it and implements
//! [`fshare_session::SignalBus`].

mod client;
mod pumps;
mod server;

pub use client::BusClient;
pub use server::{RelayServer, ServerConfig};

/// Outbound frame buffer per connection, on both client and relay.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Capacity of the client's inbound event queue.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Errors produced by the bus client.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a subscribe frame first")]
    NotSubscribed,

    #[error("timed out waiting for subscribe")]
    SubscribeTimeout,
}
