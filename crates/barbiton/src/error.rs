#![forbid(unsafe_code)]

use barbiton_drm::DrmError;
use barbiton_net::NetError;
use barbiton_stream::AssetError;
use thiserror::Error;

/// Failure to pin a track.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
    /// Track id, metadata lookup, file choice or key exchange failed.
    #[error("net: {0}")]
    Net(#[from] NetError),

    #[error("key: {0}")]
    Key(#[from] DrmError),

    #[error("asset: {0}")]
    Asset(#[from] AssetError),
}

pub type PinResult<T> = Result<T, PinError>;
