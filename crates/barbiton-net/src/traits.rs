use async_trait::async_trait;
use bytes::Bytes;

use crate::{FileId, NetResult, PacketType, TrackId, TrackInfo};

/// Outbound half of the packet session.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_packet(&self, cmd: PacketType, payload: Bytes) -> NetResult<()>;
}

/// Source of per-file AES keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Raw key bytes for `file` of `track`.
    async fn fetch_key(&self, track: &TrackId, file: &FileId) -> NetResult<Vec<u8>>;
}

/// Track metadata lookup.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve_track(&self, track: &TrackId) -> NetResult<TrackInfo>;
}
