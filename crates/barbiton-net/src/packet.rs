//! Packet commands and request payloads. All integers are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{FileId, TrackId};

/// Packet commands exchanged with the session for chunk and key transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    StreamChunk = 0x08,
    StreamChunkRes = 0x09,
    RequestKey = 0x0c,
    AesKey = 0x0d,
    AesKeyError = 0x0e,
}

impl PacketType {
    #[must_use]
    pub fn cmd(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(cmd: u8) -> Result<Self, Self::Error> {
        match cmd {
            0x08 => Ok(Self::StreamChunk),
            0x09 => Ok(Self::StreamChunkRes),
            0x0c => Ok(Self::RequestKey),
            0x0d => Ok(Self::AesKey),
            0x0e => Ok(Self::AesKeyError),
            other => Err(other),
        }
    }
}

/// Body of a `StreamChunk` request for words `[start_word, end_word)`.
#[must_use]
pub fn build_chunk_request(channel: u16, file_id: &FileId, start_word: u32, end_word: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(46);
    buf.put_u16(channel);
    buf.put_u8(0x00);
    buf.put_u8(0x01);
    buf.put_u16(0x0000);
    buf.put_u32(0x0000_0000);
    buf.put_u32(0x0000_9c40);
    buf.put_u32(0x0002_0000);
    buf.put_slice(file_id.as_bytes());
    buf.put_u32(start_word);
    buf.put_u32(end_word);
    buf.freeze()
}

/// Body of a `RequestKey` request.
#[must_use]
pub fn build_key_request(seq: u32, track: &TrackId, file_id: &FileId) -> Bytes {
    let mut buf = BytesMut::with_capacity(42);
    buf.put_slice(file_id.as_bytes());
    buf.put_slice(track.gid());
    buf.put_u32(seq);
    buf.put_u16(0x0000);
    buf.freeze()
}
