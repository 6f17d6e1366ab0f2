//! Request/response demultiplexing over the packet session.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use barbiton_events::{EventBus, NetEvent};
use barbiton_storage::{ChunkIdx, ChunkLayout};
use barbiton_stream::RawChunk;
use bytes::Buf;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    ChunkHeader, FileId, KeyProvider, NetError, NetOptions, NetResult, PacketSink, PacketType,
    TrackId, build_chunk_request, build_key_request,
};

/// Reassembly state of one open chunk channel.
struct ChannelSlot {
    ticket: u64,
    chunk: ChunkIdx,
    got_header: bool,
    total_size: Option<u64>,
    data: Vec<u8>,
    reply: oneshot::Sender<RawChunk>,
}

struct KeySlot {
    ticket: u64,
    reply: oneshot::Sender<NetResult<Vec<u8>>>,
}

#[derive(Default)]
struct RouterState {
    channels: HashMap<u16, ChannelSlot>,
    next_channel: u16,
    keys: HashMap<u32, KeySlot>,
    next_seq: u32,
    next_ticket: u64,
}

impl RouterState {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Routes chunk and key responses to the requests waiting for them.
///
/// Outbound requests go through the [`PacketSink`]; the session feeds every
/// inbound packet to [`handle_packet`](Self::handle_packet). A request whose
/// future is dropped releases its channel or sequence number.
pub struct PacketRouter {
    sink: Arc<dyn PacketSink>,
    options: NetOptions,
    bus: Option<EventBus>,
    state: Mutex<RouterState>,
}

impl PacketRouter {
    #[must_use]
    pub fn new(sink: Arc<dyn PacketSink>) -> Self {
        Self {
            sink,
            options: NetOptions::default(),
            bus: None,
            state: Mutex::new(RouterState::default()),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NetOptions) -> Self {
        self.options = options;
        self
    }

    /// Set event bus for channel and key events.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Chunk channels currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Key requests awaiting a reply.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// Fetch chunk `idx` of `file_id` on a fresh channel.
    pub async fn request_chunk(
        &self,
        file_id: &FileId,
        layout: ChunkLayout,
        idx: ChunkIdx,
    ) -> NetResult<RawChunk> {
        let (reply, rx) = oneshot::channel();
        let capacity = usize::try_from(layout.chunk_byte_size()).unwrap_or(0);
        let (channel, ticket) = self.open_channel(idx, capacity, reply)?;
        let _slot = SlotGuard {
            router: self,
            slot: Slot::Channel(channel),
            ticket,
        };

        let (start, end) = layout.word_range(idx);
        self.sink
            .send_packet(
                PacketType::StreamChunk,
                build_chunk_request(channel, file_id, start, end),
            )
            .await?;
        trace!(channel, %idx, start, end, %file_id, "chunk channel opened");
        self.publish(NetEvent::ChannelOpened {
            channel,
            chunk: idx.0,
        });

        self.await_reply(rx).await
    }

    /// Request the AES key of `file` under a fresh sequence number.
    pub async fn request_key(&self, track: &TrackId, file: &FileId) -> NetResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let (seq, ticket) = {
            let mut state = self.state.lock();
            let mut seq = state.next_seq;
            while state.keys.contains_key(&seq) {
                seq = seq.wrapping_add(1);
            }
            state.next_seq = seq.wrapping_add(1);
            let ticket = state.ticket();
            state.keys.insert(seq, KeySlot { ticket, reply });
            (seq, ticket)
        };
        let _slot = SlotGuard {
            router: self,
            slot: Slot::Key(seq),
            ticket,
        };

        self.sink
            .send_packet(PacketType::RequestKey, build_key_request(seq, track, file))
            .await?;
        debug!(seq, %track, %file, "key requested");

        self.await_reply(rx).await?
    }

    /// Route one inbound packet. Commands unrelated to chunks and keys are
    /// ignored.
    ///
    /// A key error packet is delivered to its waiter and also reported here
    /// as [`NetError::KeyRejected`].
    pub fn handle_packet(&self, cmd: u8, payload: &[u8]) -> NetResult<()> {
        match PacketType::try_from(cmd) {
            Ok(PacketType::StreamChunkRes) => self.on_chunk_packet(payload),
            Ok(PacketType::AesKey) => self.on_key_packet(payload, true),
            Ok(PacketType::AesKeyError) => self.on_key_packet(payload, false),
            _ => Ok(()),
        }
    }

    fn open_channel(
        &self,
        chunk: ChunkIdx,
        capacity: usize,
        reply: oneshot::Sender<RawChunk>,
    ) -> NetResult<(u16, u64)> {
        let mut state = self.state.lock();
        if state.channels.len() > usize::from(u16::MAX) {
            return Err(NetError::ChannelsExhausted);
        }
        let mut channel = state.next_channel;
        while state.channels.contains_key(&channel) {
            channel = channel.wrapping_add(1);
        }
        state.next_channel = channel.wrapping_add(1);
        let ticket = state.ticket();
        state.channels.insert(
            channel,
            ChannelSlot {
                ticket,
                chunk,
                got_header: false,
                total_size: None,
                data: Vec::with_capacity(capacity),
                reply,
            },
        );
        Ok((channel, ticket))
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> NetResult<T> {
        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(NetError::Closed),
            Err(_) => Err(NetError::Timeout),
        }
    }

    /// First packet on a channel is the header, then data, then an empty
    /// packet that completes the chunk.
    fn on_chunk_packet(&self, payload: &[u8]) -> NetResult<()> {
        let mut body = payload;
        if body.remaining() < 2 {
            return Err(NetError::malformed("chunk packet without channel id"));
        }
        let channel = body.get_u16();

        let mut state = self.state.lock();
        let Entry::Occupied(mut entry) = state.channels.entry(channel) else {
            trace!(channel, "packet on unknown channel");
            return Err(NetError::UnknownChannel(channel));
        };

        let slot = entry.get_mut();
        if !slot.got_header {
            slot.got_header = true;
            slot.total_size = ChunkHeader::parse(body).total_size;
            trace!(channel, chunk = %slot.chunk, total_size = ?slot.total_size, "chunk header");
            return Ok(());
        }
        if !body.is_empty() {
            slot.data.extend_from_slice(body);
            return Ok(());
        }

        let slot = entry.remove();
        drop(state);
        let bytes = slot.data.len();
        trace!(channel, chunk = %slot.chunk, bytes, "chunk channel completed");
        self.publish(NetEvent::ChannelCompleted { channel, bytes });
        // The requester may have given up already; nothing to do then.
        let _ = slot.reply.send(RawChunk {
            total_size: slot.total_size,
            data: slot.data,
        });
        Ok(())
    }

    fn on_key_packet(&self, payload: &[u8], accepted: bool) -> NetResult<()> {
        let mut body = payload;
        if body.remaining() < 4 {
            return Err(NetError::malformed("key packet without sequence number"));
        }
        let seq = body.get_u32();
        let slot = self
            .state
            .lock()
            .keys
            .remove(&seq)
            .ok_or(NetError::UnknownSequence(seq))?;

        if !accepted {
            warn!(seq, "audio key rejected");
            self.publish(NetEvent::KeyRejected { seq });
            let _ = slot.reply.send(Err(NetError::KeyRejected { seq }));
            return Err(NetError::KeyRejected { seq });
        }

        let Some(key) = body.get(..16) else {
            let err = NetError::malformed(format!("key packet {seq} carries {} key bytes", body.len()));
            let _ = slot.reply.send(Err(err.clone()));
            return Err(err);
        };
        trace!(seq, "audio key received");
        self.publish(NetEvent::KeyReceived { seq });
        let _ = slot.reply.send(Ok(key.to_vec()));
        Ok(())
    }

    fn publish(&self, event: NetEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

impl fmt::Debug for PacketRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PacketRouter")
            .field("open_channels", &state.channels.len())
            .field("pending_keys", &state.keys.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyProvider for PacketRouter {
    async fn fetch_key(&self, track: &TrackId, file: &FileId) -> NetResult<Vec<u8>> {
        self.request_key(track, file).await
    }
}

enum Slot {
    Channel(u16),
    Key(u32),
}

/// Releases a request's slot when its future completes or is dropped.
///
/// The ticket guards against removing a slot that reused the same id.
struct SlotGuard<'a> {
    router: &'a PacketRouter,
    slot: Slot,
    ticket: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.router.state.lock();
        match self.slot {
            Slot::Channel(channel) => {
                if state
                    .channels
                    .get(&channel)
                    .is_some_and(|s| s.ticket == self.ticket)
                {
                    state.channels.remove(&channel);
                    trace!(channel, "chunk channel released");
                }
            }
            Slot::Key(seq) => {
                if state.keys.get(&seq).is_some_and(|s| s.ticket == self.ticket) {
                    state.keys.remove(&seq);
                }
            }
        }
    }
}
