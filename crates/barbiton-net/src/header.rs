//! Header records of the first packet on a chunk channel.

use bytes::Buf;
use tracing::trace;

/// Record type carrying the total asset size in 4-byte words.
pub const HEADER_ASSET_WORD_SIZE: u8 = 0x03;

/// Fields extracted from a chunk response header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Total asset size in bytes.
    pub total_size: Option<u64>,
}

impl ChunkHeader {
    /// Parse `u16 len, u8 type, [len - 1 bytes]` records until a zero length
    /// or the end of the buffer. Unknown record types are skipped; a record
    /// running past the buffer ends parsing.
    #[must_use]
    pub fn parse(mut data: &[u8]) -> Self {
        let mut header = Self::default();

        while data.remaining() >= 2 {
            let len = usize::from(data.get_u16());
            if len == 0 || data.remaining() < len {
                break;
            }
            let (record, rest) = data.split_at(len);
            data = rest;

            let mut record = record;
            let kind = record.get_u8();
            trace!(kind, len, "chunk header record");
            if kind == HEADER_ASSET_WORD_SIZE && record.remaining() >= 4 {
                let words = u64::from(record.get_u32());
                header.total_size = Some(words << 2);
            }
        }

        header
    }
}
