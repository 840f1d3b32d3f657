//! Chunked transfer primitives: splitting a file into indexed chunks, encoding
//! them for a text channel, storing them sparsely on the receiving side, and
//! deciding which chunks to request next.
//!
//! Nothing here performs network I/O. The session layer feeds events in and
//! turns the returned decisions into channel messages.

mod codec;
mod progress;
mod store;
mod types;
mod validation;
mod window;

pub use codec::{
    checksum_bytes, chunk_count, decode_chunk, encode_chunk, join_chunks, package_data_message,
    package_done_message, package_request_message, split_into_chunks, unpack_message,
};
pub use progress::{ShareTimer, SpeedCalculator};
pub use store::ChunkStore;
pub use types::{IncomingFile, OutgoingFile, ReceivedFile, StagedFile};
pub use validation::validate_file_name;
pub use window::{Expiry, RequestWindow, WindowConfig};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] fshare_protocol::ProtocolError),

    #[error("invalid chunk encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk index {index} out of range (expected {expected} chunks)")]
    IndexOutOfRange { index: u32, expected: usize },

    #[error("transfer incomplete: {received} of {expected} chunks")]
    Incomplete { received: usize, expected: usize },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),
}
