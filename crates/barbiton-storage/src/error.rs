#![forbid(unsafe_code)]

use thiserror::Error;

use crate::{ChunkIdx, ChunkStatus};

/// Result type used by `barbiton-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by the chunk store.
///
/// Every variant indicates a bookkeeping bug in the caller (the asset
/// run-loop), never a transient condition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("chunk {0} is already resident")]
    AlreadyPresent(ChunkIdx),

    #[error("chunk {0} is not resident")]
    Missing(ChunkIdx),

    #[error("chunk {idx}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        idx: ChunkIdx,
        from: ChunkStatus,
        to: ChunkStatus,
    },
}
