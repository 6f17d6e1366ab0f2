#![forbid(unsafe_code)]

//! Chunk decryption for barbiton assets.
//!
//! Audio files are encrypted with AES-128 in counter mode. The counter is a
//! pure function of the absolute byte offset, so any chunk can be decrypted
//! independently of the order in which chunks arrive.

mod context;
mod decrypt;
mod error;

pub use context::{AUDIO_AES_IV, DecryptContext};
pub use decrypt::{SEGMENT_STRIDE, decrypt_segment, segment_counter};
pub use error::DrmError;
