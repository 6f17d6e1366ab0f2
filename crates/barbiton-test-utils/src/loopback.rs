//! In-process packet server answering chunk and key requests.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use barbiton_drm::DecryptContext;
use barbiton_net::{FileId, NetError, NetResult, PacketRouter, PacketSink, PacketType};
use barbiton_storage::ChunkLayout;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::trace;

use crate::encrypt_chunks;

struct ServedFile {
    ciphertext: Vec<u8>,
    /// `None` answers key requests with a key error.
    key: Option<[u8; 16]>,
}

/// [`PacketSink`] that plays the remote side of the session.
///
/// Requests are answered asynchronously by feeding response packets to the
/// attached [`PacketRouter`], the way a session reader task would.
pub struct LoopbackServer {
    files: Mutex<HashMap<FileId, ServedFile>>,
    router: Mutex<Weak<PacketRouter>>,
    packet_size: usize,
    sent: Mutex<Vec<(PacketType, Bytes)>>,
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            router: Mutex::new(Weak::new()),
            packet_size: 1024,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl LoopbackServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Split chunk bodies into packets of at most `bytes`.
    #[must_use]
    pub fn with_packet_size(mut self, bytes: usize) -> Self {
        self.packet_size = bytes.max(1);
        self
    }

    /// Serve `plaintext` as `file_id`, encrypted with `key` per `layout` chunk.
    pub fn add_file(&self, file_id: FileId, plaintext: &[u8], layout: ChunkLayout, key: [u8; 16]) {
        let ciphertext = encrypt_chunks(plaintext, layout, &DecryptContext::audio(key));
        self.files.lock().insert(
            file_id,
            ServedFile {
                ciphertext,
                key: Some(key),
            },
        );
    }

    /// Answer key requests for `file_id` with a key error.
    pub fn reject_key(&self, file_id: &FileId) {
        if let Some(file) = self.files.lock().get_mut(file_id) {
            file.key = None;
        }
    }

    /// Deliver responses to `router`.
    pub fn attach(&self, router: &Arc<PacketRouter>) {
        *self.router.lock() = Arc::downgrade(router);
    }

    /// Every packet received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(PacketType, Bytes)> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn count(&self, cmd: PacketType) -> usize {
        self.sent.lock().iter().filter(|(c, _)| *c == cmd).count()
    }

    fn serve_chunk(&self, req: &[u8]) -> NetResult<Vec<(PacketType, Bytes)>> {
        let field = |range: std::ops::Range<usize>| {
            req.get(range)
                .ok_or_else(|| NetError::malformed("short chunk request"))
        };
        let channel = field(0..2)?;
        let file_id = FileId::new(field(18..38)?.try_into().map_err(|_| NetError::malformed("file id"))?);
        let word = |bytes: &[u8]| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let start = word(field(38..42)?) as usize * 4;
        let end = word(field(42..46)?) as usize * 4;

        let files = self.files.lock();
        let file = files
            .get(&file_id)
            .ok_or_else(|| NetError::transport(format!("unknown file {file_id}")))?;
        let total = file.ciphertext.len();
        let body = &file.ciphertext[start.min(total)..end.min(total)];
        trace!(%file_id, start, end, len = body.len(), "serving chunk");

        let words = u32::try_from(total.div_ceil(4)).unwrap_or(u32::MAX);
        let mut header = BytesMut::new();
        header.put_slice(channel);
        header.put_u16(5);
        header.put_u8(0x03);
        header.put_u32(words);
        header.put_u16(0);

        let mut out = vec![(PacketType::StreamChunkRes, header.freeze())];
        for piece in body.chunks(self.packet_size) {
            let mut packet = BytesMut::with_capacity(2 + piece.len());
            packet.put_slice(channel);
            packet.put_slice(piece);
            out.push((PacketType::StreamChunkRes, packet.freeze()));
        }
        out.push((PacketType::StreamChunkRes, Bytes::copy_from_slice(channel)));
        Ok(out)
    }

    fn serve_key(&self, req: &[u8]) -> NetResult<Vec<(PacketType, Bytes)>> {
        let (Some(file_id), Some(seq)) = (req.get(..20), req.get(36..40)) else {
            return Err(NetError::malformed("short key request"));
        };
        let file_id = FileId::new(file_id.try_into().map_err(|_| NetError::malformed("file id"))?);
        let key = self.files.lock().get(&file_id).and_then(|f| f.key);

        let mut reply = BytesMut::new();
        reply.put_slice(seq);
        let cmd = match key {
            Some(key) => {
                reply.put_slice(&key);
                PacketType::AesKey
            }
            None => {
                reply.put_u16(0);
                PacketType::AesKeyError
            }
        };
        Ok(vec![(cmd, reply.freeze())])
    }
}

#[async_trait]
impl PacketSink for LoopbackServer {
    async fn send_packet(&self, cmd: PacketType, payload: Bytes) -> NetResult<()> {
        self.sent.lock().push((cmd, payload.clone()));
        let router = self
            .router
            .lock()
            .upgrade()
            .ok_or_else(|| NetError::transport("loopback not attached"))?;

        let responses = match cmd {
            PacketType::StreamChunk => self.serve_chunk(&payload)?,
            PacketType::RequestKey => self.serve_key(&payload)?,
            _ => Vec::new(),
        };

        tokio::spawn(async move {
            for (cmd, body) in responses {
                tokio::task::yield_now().await;
                if let Err(e) = router.handle_packet(cmd.cmd(), &body) {
                    trace!(error = %e, "loopback response not routed");
                }
            }
        });
        Ok(())
    }
}
