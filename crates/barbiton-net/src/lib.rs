#![forbid(unsafe_code)]

//! `barbiton-net`
//!
//! Chunk and key transport over a packet session.
//!
//! Chunk requests are tagged with a 16-bit channel id, key requests with a
//! 32-bit sequence number. [`PacketRouter`] allocates both, sends requests
//! through a [`PacketSink`], and routes every inbound packet handed to
//! [`PacketRouter::handle_packet`] to the request waiting for it.

mod error;
mod format;
mod header;
mod packet;
mod router;
mod source;
mod track;
mod traits;
mod types;

pub use crate::{
    error::{NetError, NetResult},
    format::{AudioFormat, OGG_HEADER_SIZE},
    header::{ChunkHeader, HEADER_ASSET_WORD_SIZE},
    packet::{PacketType, build_chunk_request, build_key_request},
    router::PacketRouter,
    source::NetChunkSource,
    track::{AudioFile, FileId, TRACK_URI_PREFIX, TrackId, TrackInfo},
    traits::{KeyProvider, PacketSink, TrackResolver},
    types::NetOptions,
};
