use crate::TransferError;
use crate::codec::join_chunks;

/// Sparse, index-addressed storage for the chunks of one incoming file.
///
/// The capacity is fixed at creation. Each index is written at most once;
/// later writes to a filled slot are ignored.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    slots: Vec<Option<Vec<u8>>>,
    received: usize,
    bytes: u64,
}

impl ChunkStore {
    /// Creates an empty store for `expected` chunks.
    pub fn new(expected: usize) -> Self {
        Self {
            slots: vec![None; expected],
            received: 0,
            bytes: 0,
        }
    }

    /// Number of chunks the store was sized for.
    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    /// Number of distinct indices stored so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Bytes stored so far.
    pub fn received_bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns `true` if chunk `index` is present.
    pub fn contains(&self, index: u32) -> bool {
        matches!(self.slots.get(index as usize), Some(Some(_)))
    }

    /// Stores chunk `index`.
    ///
    /// Returns `Ok(true)` if the chunk was newly stored and `Ok(false)` if the
    /// slot was already filled.
    pub fn insert(&mut self, index: u32, bytes: Vec<u8>) -> Result<bool, TransferError> {
        let expected = self.slots.len();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(TransferError::IndexOutOfRange { index, expected })?;
        if slot.is_some() {
            return Ok(false);
        }
        self.bytes += bytes.len() as u64;
        *slot = Some(bytes);
        self.received += 1;
        Ok(true)
    }

    /// Returns `true` once every index has been stored.
    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// Joins the stored chunks in index order.
    pub fn assemble(&self) -> Result<Vec<u8>, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::Incomplete {
                received: self.received,
                expected: self.slots.len(),
            });
        }
        Ok(join_chunks(self.slots.iter().flatten()))
    }
}
