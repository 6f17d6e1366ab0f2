//! Keys and payload builders shared by asset and protocol tests.

use barbiton_drm::{DecryptContext, decrypt_segment};
use barbiton_storage::ChunkLayout;

use crate::Xorshift64;

/// AES key used by every fixture unless a test supplies its own.
pub const TEST_KEY: [u8; 16] = *b"barbiton-testkey";

#[must_use]
pub fn test_key() -> DecryptContext {
    DecryptContext::audio(TEST_KEY)
}

/// Deterministic plaintext of `len` bytes.
#[must_use]
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    Xorshift64::new(seed).bytes(len)
}

/// Encrypt `plain` chunk by chunk, each at its absolute offset.
///
/// Matches what the asset run-loop undoes for any chunk size. For chunk
/// sizes that are multiples of 4096 it equals encrypting the file as one
/// stream.
#[must_use]
pub fn encrypt_chunks(plain: &[u8], layout: ChunkLayout, ctx: &DecryptContext) -> Vec<u8> {
    let size = usize::try_from(layout.chunk_byte_size()).unwrap_or(usize::MAX);
    let mut out = plain.to_vec();
    for (i, chunk) in out.chunks_mut(size).enumerate() {
        let start = (i as u64) * layout.chunk_byte_size();
        decrypt_segment(ctx, start, chunk);
    }
    out
}
