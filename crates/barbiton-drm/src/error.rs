#![forbid(unsafe_code)]

use thiserror::Error;

/// DRM errors. All of them are fatal at asset-open time.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DrmError {
    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),
}
