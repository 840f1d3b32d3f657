use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use fshare_protocol::ChannelMessage;

use crate::TransferError;

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Returns the number of chunks a payload of `len` bytes splits into.
///
/// A zero `chunk_size` yields zero chunks; callers validate the size first.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Partitions `data` into contiguous slices of `chunk_size` bytes.
///
/// Chunk `i` starts at offset `i * chunk_size`; the last chunk may be shorter.
/// An empty payload produces no chunks.
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Result<Vec<Vec<u8>>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }
    Ok(data.chunks(chunk_size).map(<[u8]>::to_vec).collect())
}

/// Concatenates chunks in index order.
pub fn join_chunks<I, C>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }
    out
}

// ---------------------------------------------------------------------------
// Text encoding
// ---------------------------------------------------------------------------

/// Encodes chunk bytes for a text-oriented channel (standard base64).
pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Reverses [`encode_chunk`].
pub fn decode_chunk(text: &str) -> Result<Vec<u8>, TransferError> {
    Ok(STANDARD.decode(text)?)
}

// ---------------------------------------------------------------------------
// Message packaging
// ---------------------------------------------------------------------------

/// Wraps one chunk into a `data` message.
pub fn package_data_message(index: u32, bytes: &[u8]) -> Result<String, TransferError> {
    let msg = ChannelMessage::Data {
        id: index,
        content: encode_chunk(bytes),
    };
    Ok(msg.to_json()?)
}

/// Builds a batched `request` message for `indices`.
pub fn package_request_message(indices: &[u32]) -> Result<String, TransferError> {
    let msg = ChannelMessage::Request {
        ids: indices.to_vec(),
    };
    Ok(msg.to_json()?)
}

/// Builds the `done` message the receiver sends once its store is full.
pub fn package_done_message() -> Result<String, TransferError> {
    Ok(ChannelMessage::Done.to_json()?)
}

/// Parses an inbound channel message.
pub fn unpack_message(text: &str) -> Result<ChannelMessage, TransferError> {
    Ok(ChannelMessage::from_json(text)?)
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
