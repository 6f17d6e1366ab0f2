#![forbid(unsafe_code)]

//! `barbiton-storage`
//!
//! Chunk-level storage primitives for a single media asset.
//!
//! Provides:
//! - [`ChunkIdx`] / [`ChunkLayout`]: offset <-> chunk index arithmetic
//! - [`ChunkStore`]: index-keyed chunk map with a strict per-chunk status
//!   machine (`InProgress -> ReadyToDecrypt -> Ready`, or `Halted`)
//! - Resident-limit eviction by oldest access stamp

mod chunk;
mod error;
mod store;

pub use chunk::{CHUNK_BYTE_SIZE, CHUNK_WORD_SIZE, Chunk, ChunkIdx, ChunkLayout, ChunkStatus};
pub use error::{StorageError, StorageResult};
pub use store::{ChunkStore, DEFAULT_RESIDENT_BYTES, resident_limit_for_bytes};
