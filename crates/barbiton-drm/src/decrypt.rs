#![forbid(unsafe_code)]

//! AES-128-CTR segment decryption.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use tracing::trace;

use crate::DecryptContext;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Bytes covered by one counter segment (1024 words).
pub const SEGMENT_STRIDE: usize = 4096;

/// Counter increment between consecutive segments (`SEGMENT_STRIDE / 16` AES blocks).
const SEGMENT_COUNTER_STEP: u128 = 0x100;

/// Counter block for the segment containing `byte_offset`.
///
/// `iv + (byte_offset / 4096) * 0x100`, as a 128-bit big-endian integer.
#[must_use]
pub fn segment_counter(iv: &[u8; 16], byte_offset: u64) -> u128 {
    u128::from_be_bytes(*iv).wrapping_add(u128::from((byte_offset >> 12) << 8))
}

/// Decrypt `buf` in place, where `buf[0]` sits at absolute `byte_offset`.
///
/// The buffer is processed in [`SEGMENT_STRIDE`] blocks, each keyed with its
/// own counter block. CTR is an involution, so the same call encrypts.
pub fn decrypt_segment(ctx: &DecryptContext, byte_offset: u64, buf: &mut [u8]) {
    let mut counter = segment_counter(&ctx.iv, byte_offset);

    for segment in buf.chunks_mut(SEGMENT_STRIDE) {
        let iv = counter.to_be_bytes();
        let mut cipher = Aes128Ctr::new((&ctx.key).into(), (&iv).into());
        cipher.apply_keystream(segment);
        counter = counter.wrapping_add(SEGMENT_COUNTER_STEP);
    }

    trace!(byte_offset, len = buf.len(), "segment decrypted");
}
