#![forbid(unsafe_code)]

/// Events emitted by a media asset's run-loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetEvent {
    /// A chunk fetch was dispatched. `read_ahead` is false for the chunk a
    /// reader is blocked on.
    ChunkRequested { idx: u32, read_ahead: bool },

    /// A chunk was decrypted and is readable.
    ChunkReady { idx: u32, len: usize },

    /// Total size became known from the first chunk's header.
    SizeKnown { total_bytes: u64, final_chunk: u32 },

    /// A chunk was dropped to stay within the resident limit.
    ChunkEvicted { idx: u32 },

    /// The asset was closed.
    Closed,

    /// The asset failed; all readers observe this error.
    Failed { error: String },
}
