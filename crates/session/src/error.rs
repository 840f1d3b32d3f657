//! Session error types.

/// Errors reported by a peer transport or one of its data channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("data channel not open")]
    NotOpen,

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("operation not valid in current state: {0}")]
    InvalidState(String),

    #[error("transport error: {0}")]
    Backend(String),
}

/// Errors produced by sessions and the share client.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transfer error: {0}")]
    Transfer(#[from] fshare_transfer::TransferError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session closed")]
    Closed,
}
