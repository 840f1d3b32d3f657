use std::path::Path;

use fshare_protocol::FileMetadata;

use crate::TransferError;
use crate::codec::{checksum_bytes, decode_chunk, split_into_chunks};
use crate::store::ChunkStore;

/// MIME type used when none can be guessed from the file name.
pub const FALLBACK_MIME: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Sending side
// ---------------------------------------------------------------------------

/// A file picked for sharing, held fully in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads `path` and guesses its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME)
            .to_string();
        tracing::debug!(file = %name, %mime, bytes = bytes.len(), "staged file");
        Ok(Self { name, mime, bytes })
    }

    /// Splits the file into chunks of `chunk_size` bytes ready to be served.
    pub fn stage(&self, chunk_size: usize) -> Result<OutgoingFile, TransferError> {
        let chunks = split_into_chunks(&self.bytes, chunk_size)?;
        Ok(OutgoingFile {
            metadata: FileMetadata {
                name: self.name.clone(),
                mime: self.mime.clone(),
                chunk_count: chunks.len(),
                total_bytes: Some(self.bytes.len() as u64),
            },
            chunks,
        })
    }
}

/// A staged file split into indexed chunks.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    metadata: FileMetadata,
    chunks: Vec<Vec<u8>>,
}

impl OutgoingFile {
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns chunk `index`, or `None` if it is out of range.
    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        self.chunks.get(index as usize).map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// Receiving side
// ---------------------------------------------------------------------------

/// A file being received: the announced metadata plus the chunks seen so far.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    metadata: FileMetadata,
    store: ChunkStore,
}

impl IncomingFile {
    pub fn new(metadata: FileMetadata) -> Self {
        let store = ChunkStore::new(metadata.chunk_count);
        Self { metadata, store }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Decodes and stores one `data` message payload.
    ///
    /// Returns `Ok(true)` if the chunk was new.
    pub fn accept(&mut self, index: u32, content: &str) -> Result<bool, TransferError> {
        if self.store.contains(index) {
            return Ok(false);
        }
        let bytes = decode_chunk(content)?;
        self.store.insert(index, bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.store.is_complete()
    }

    /// Assembles the received chunks into the final file.
    pub fn finalize(&self) -> Result<ReceivedFile, TransferError> {
        let bytes = self.store.assemble()?;
        let actual = bytes.len() as u64;
        if let Some(expected) = self.metadata.total_bytes.filter(|&n| n != actual) {
            tracing::warn!(
                file = %self.metadata.name,
                expected,
                actual,
                "assembled size differs from announced size"
            );
        }
        Ok(ReceivedFile {
            name: self.metadata.name.clone(),
            mime: self.metadata.mime.clone(),
            checksum: checksum_bytes(&bytes),
            bytes,
        })
    }
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    /// SHA-256 hex digest of `bytes`.
    pub checksum: String,
}
