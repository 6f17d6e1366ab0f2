#![forbid(unsafe_code)]

use std::io;

use barbiton_drm::DrmError;
use barbiton_storage::StorageError;
use thiserror::Error;

/// Failure of a single chunk fetch, as reported by a [`ChunkSource`](crate::ChunkSource).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed chunk response: {0}")]
    Malformed(String),

    #[error("request abandoned before completion")]
    Abandoned,
}

/// Terminal error of a media asset.
///
/// Stored once (first error wins) and handed to every blocked and future reader.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    /// The asset was closed or cancelled. Expected; callers should just stop.
    #[error("asset closed")]
    Closed,

    #[error("chunk fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decryption failed: {0}")]
    Decrypt(#[from] DrmError),

    #[error("chunk store error: {0}")]
    Storage(#[from] StorageError),

    #[error("no tokio runtime available to drive the asset")]
    NoRuntime,
}

impl AssetError {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl From<AssetError> for io::Error {
    fn from(e: AssetError) -> Self {
        match e {
            AssetError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, e),
            other => io::Error::other(other),
        }
    }
}

/// Result type for `barbiton-stream`.
pub type AssetResult<T> = Result<T, AssetError>;
