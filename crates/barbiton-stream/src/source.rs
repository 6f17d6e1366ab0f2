#![forbid(unsafe_code)]

use async_trait::async_trait;
use barbiton_storage::ChunkIdx;

use crate::FetchError;

/// Raw (still encrypted) bytes of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawChunk {
    /// Total asset size in bytes, from the response header.
    ///
    /// Required on chunk 0; it is the only way the asset learns its size.
    pub total_size: Option<u64>,
    /// Ciphertext. Shorter than a full chunk only for the final chunk.
    pub data: Vec<u8>,
}

/// Network seam: fetches one chunk of one asset.
///
/// Each call must resolve exactly once. Implementations tag the request so
/// the asynchronous response reaches this call and not another pending one.
#[async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    async fn fetch_chunk(&self, idx: ChunkIdx) -> Result<RawChunk, FetchError>;
}
