use std::sync::Arc;

use async_trait::async_trait;
use barbiton_storage::{ChunkIdx, ChunkLayout};
use barbiton_stream::{ChunkSource, FetchError, RawChunk};

use crate::{FileId, PacketRouter};

/// [`ChunkSource`] fetching one file's chunks through a [`PacketRouter`].
#[derive(Clone, Debug)]
pub struct NetChunkSource {
    router: Arc<PacketRouter>,
    file_id: FileId,
    layout: ChunkLayout,
}

impl NetChunkSource {
    #[must_use]
    pub fn new(router: Arc<PacketRouter>, file_id: FileId, layout: ChunkLayout) -> Self {
        Self {
            router,
            file_id,
            layout,
        }
    }

    #[must_use]
    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }
}

#[async_trait]
impl ChunkSource for NetChunkSource {
    async fn fetch_chunk(&self, idx: ChunkIdx) -> Result<RawChunk, FetchError> {
        self.router
            .request_chunk(&self.file_id, self.layout, idx)
            .await
            .map_err(FetchError::from)
    }
}
