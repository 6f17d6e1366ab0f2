#![forbid(unsafe_code)]

//! Per-asset decryption parameters.

use std::fmt;

use crate::DrmError;

/// Fixed initialization vector for audio file encryption.
pub const AUDIO_AES_IV: [u8; 16] = [
    0x72, 0xe0, 0x67, 0xfb, 0xdd, 0xcb, 0xcf, 0x77, 0xeb, 0xe8, 0xbc, 0x64, 0x3f, 0x63, 0x0d, 0x93,
];

/// AES-128-CTR decryption context.
///
/// Resolved once per asset before any chunk is decrypted.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct DecryptContext {
    /// AES-128 key (16 bytes).
    pub key: [u8; 16],
    /// Base counter block for byte offset 0.
    pub iv: [u8; 16],
}

impl DecryptContext {
    /// Context with an explicit base counter.
    #[must_use]
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Context for an audio file key, using [`AUDIO_AES_IV`].
    #[must_use]
    pub fn audio(key: [u8; 16]) -> Self {
        Self::new(key, AUDIO_AES_IV)
    }

    /// Build an audio context from raw key material received on the wire.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, DrmError> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKeyLength(key.len()))?;
        Ok(Self::audio(key))
    }
}

// Key material stays out of logs.
impl fmt::Debug for DecryptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptContext")
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}
