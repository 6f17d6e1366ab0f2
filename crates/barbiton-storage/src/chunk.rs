#![forbid(unsafe_code)]

use std::fmt;

use bytes::Bytes;

/// Number of 4-byte words per chunk on the wire.
pub const CHUNK_WORD_SIZE: u64 = 1 << 15;

/// Default chunk size in bytes (128 KiB).
pub const CHUNK_BYTE_SIZE: u64 = CHUNK_WORD_SIZE << 2;

/// 0-based index of a chunk within an asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkIdx(pub u32);

impl ChunkIdx {
    /// Chunk covering `byte_offset` under the default layout.
    #[must_use]
    pub fn at_offset(byte_offset: u64) -> Self {
        ChunkLayout::default().chunk_at(byte_offset)
    }

    /// Absolute start offset of this chunk under the default layout.
    #[must_use]
    pub fn start_byte_offset(self) -> u64 {
        ChunkLayout::default().start_of(self)
    }

    /// Index `n` chunks further right, saturating.
    #[must_use]
    pub fn ahead(self, n: u32) -> Self {
        Self(self.0.saturating_add(n))
    }
}

impl fmt::Display for ChunkIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Chunk geometry of an asset.
///
/// The wire protocol addresses chunks in 4-byte words, so the chunk size is
/// always a non-zero multiple of 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_byte_size: u64,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_byte_size: CHUNK_BYTE_SIZE,
        }
    }
}

impl ChunkLayout {
    /// Layout with `chunk_byte_size` rounded down to a multiple of 4 (minimum 4).
    #[must_use]
    pub fn new(chunk_byte_size: u64) -> Self {
        Self {
            chunk_byte_size: (chunk_byte_size & !3).max(4),
        }
    }

    #[must_use]
    pub fn chunk_byte_size(&self) -> u64 {
        self.chunk_byte_size
    }

    /// Index of the chunk covering `byte_offset`.
    #[must_use]
    pub fn chunk_at(&self, byte_offset: u64) -> ChunkIdx {
        ChunkIdx(u32::try_from(byte_offset / self.chunk_byte_size).unwrap_or(u32::MAX))
    }

    /// Absolute byte offset where `idx` starts.
    #[must_use]
    pub fn start_of(&self, idx: ChunkIdx) -> u64 {
        u64::from(idx.0) * self.chunk_byte_size
    }

    /// Index of the last chunk of an asset of `total_size` bytes.
    #[must_use]
    pub fn final_chunk(&self, total_size: u64) -> ChunkIdx {
        self.chunk_at(total_size.saturating_sub(1))
    }

    /// Word range `[start, end)` requested on the wire for `idx`.
    #[must_use]
    pub fn word_range(&self, idx: ChunkIdx) -> (u32, u32) {
        let words = self.chunk_byte_size >> 2;
        let start = u64::from(idx.0) * words;
        let clamp = |w: u64| u32::try_from(w).unwrap_or(u32::MAX);
        (clamp(start), clamp(start + words))
    }
}

/// Availability of a single chunk.
///
/// Transitions: `InProgress -> ReadyToDecrypt -> Ready`. `Halted` is terminal
/// and reachable from any state when the owning asset fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    Halted,
    /// Fetch dispatched; bytes not yet received.
    InProgress,
    /// Ciphertext received, not yet decrypted.
    ReadyToDecrypt,
    /// Plaintext available and immutable.
    Ready,
}

/// One resident chunk.
#[derive(Clone, Debug)]
pub struct Chunk {
    idx: ChunkIdx,
    status: ChunkStatus,
    data: Bytes,
    access_stamp: u64,
    readers: u32,
}

impl Chunk {
    pub(crate) fn in_progress(idx: ChunkIdx) -> Self {
        Self {
            idx,
            status: ChunkStatus::InProgress,
            data: Bytes::new(),
            access_stamp: 0,
            readers: 0,
        }
    }

    #[must_use]
    pub fn idx(&self) -> ChunkIdx {
        self.idx
    }

    #[must_use]
    pub fn status(&self) -> ChunkStatus {
        self.status
    }

    /// Plaintext bytes. Empty until the chunk is `Ready`.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn access_stamp(&self) -> u64 {
        self.access_stamp
    }

    /// Number of readers currently pinning this chunk.
    #[must_use]
    pub fn readers(&self) -> u32 {
        self.readers
    }

    pub(crate) fn set_status(&mut self, status: ChunkStatus) {
        self.status = status;
    }

    pub(crate) fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    pub(crate) fn pin(&mut self, stamp: u64) {
        self.readers = self.readers.saturating_add(1);
        self.touch(stamp);
    }

    pub(crate) fn touch(&mut self, stamp: u64) {
        self.access_stamp = stamp;
    }

    pub(crate) fn unpin(&mut self) {
        self.readers = self.readers.saturating_sub(1);
    }
}
