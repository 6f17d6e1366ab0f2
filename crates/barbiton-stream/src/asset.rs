#![forbid(unsafe_code)]

//! Media asset: chunk state, the run-loop that owns it, and the blocking
//! primitives readers use to wait for chunks.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use barbiton_drm::{DecryptContext, decrypt_segment};
use barbiton_events::{AssetEvent, Event, EventBus};
use barbiton_storage::{ChunkIdx, ChunkLayout, ChunkStatus, ChunkStore};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    AssetConfig, AssetError, AssetResult, ChunkSource, FetchError, FetchScheduler, RawChunk,
    StreamReader,
};

/// Static description of an asset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// Human readable label, e.g. `"Artist - Title (id).ogg"`.
    pub label: String,
    /// MIME type of the decrypted payload.
    pub media_type: String,
    /// Bytes at the start of the file that precede the playable payload.
    pub header_offset: u64,
}

impl AssetDescriptor {
    pub fn new<L: Into<String>, M: Into<String>>(label: L, media_type: M) -> Self {
        Self {
            label: label.into(),
            media_type: media_type.into(),
            header_offset: 0,
        }
    }

    #[must_use]
    pub fn with_header_offset(mut self, header_offset: u64) -> Self {
        self.header_offset = header_offset;
        self
    }
}

/// Point-in-time snapshot of an asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetStats {
    pub total_size: Option<u64>,
    pub final_chunk: ChunkIdx,
    pub resident_chunks: usize,
    pub resident_limit: usize,
    pub in_flight: usize,
    pub error: Option<AssetError>,
}

pub(crate) enum AssetCmd {
    /// A reader is positioned in this chunk.
    Need(ChunkIdx),
    Fetched {
        idx: ChunkIdx,
        result: Result<RawChunk, FetchError>,
    },
}

/// A ready chunk pinned by a reader.
#[derive(Clone, Debug)]
pub(crate) struct PinnedChunk {
    pub(crate) idx: ChunkIdx,
    pub(crate) start: u64,
    pub(crate) data: Bytes,
}

struct AssetState {
    store: ChunkStore,
    scheduler: FetchScheduler,
    total_size: Option<u64>,
    final_chunk: ChunkIdx,
    /// Most recent chunk a reader asked for; anchors the read-ahead window.
    latest_need: ChunkIdx,
    access_clock: u64,
    error: Option<AssetError>,
}

pub(crate) struct AssetShared {
    descriptor: AssetDescriptor,
    layout: ChunkLayout,
    fetch_ahead: u32,
    state: Mutex<AssetState>,
    chunk_changed: Condvar,
    cmd_tx: mpsc::UnboundedSender<AssetCmd>,
    cancel: CancellationToken,
    bus: EventBus,
}

impl AssetShared {
    pub(crate) fn header_offset(&self) -> u64 {
        self.descriptor.header_offset
    }

    pub(crate) fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub(crate) fn check(&self) -> AssetResult<()> {
        match &self.state.lock().error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn total_size(&self) -> Option<u64> {
        self.state.lock().total_size
    }

    pub(crate) fn final_chunk(&self) -> ChunkIdx {
        self.state.lock().final_chunk
    }

    /// Block until chunk 0 has arrived and the asset size is known.
    ///
    /// Returns the pinned chunk 0 when this call had to wait for it, `None`
    /// when the size was already known.
    pub(crate) fn wait_first_chunk(&self, abort: &AtomicBool) -> AssetResult<Option<PinnedChunk>> {
        if self.state.lock().total_size.is_some() {
            return Ok(None);
        }
        self.acquire(ChunkIdx(0), abort)
    }

    /// Block until `idx` is ready, then pin it.
    ///
    /// `Ok(None)` means `idx` lies past the final chunk. Re-announces the
    /// need whenever the chunk is absent on wakeup (evicted, or not
    /// dispatchable before the size was known). While blocked, the reader is
    /// registered as a waiter so the chunk survives eviction until pinned.
    pub(crate) fn acquire(&self, idx: ChunkIdx, abort: &AtomicBool) -> AssetResult<Option<PinnedChunk>> {
        let mut state = self.state.lock();
        let mut waiting = false;
        let result = self.acquire_locked(&mut state, idx, abort, &mut waiting);
        if waiting {
            state.store.remove_waiter(idx);
        }
        result
    }

    fn acquire_locked(
        &self,
        state: &mut MutexGuard<'_, AssetState>,
        idx: ChunkIdx,
        abort: &AtomicBool,
        waiting: &mut bool,
    ) -> AssetResult<Option<PinnedChunk>> {
        let mut announced = false;
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if abort.load(Ordering::Acquire) {
                return Err(AssetError::Closed);
            }
            if state.total_size.is_some() && idx > state.final_chunk {
                return Ok(None);
            }

            if !announced || !state.store.contains(idx) {
                if self.cmd_tx.send(AssetCmd::Need(idx)).is_err() {
                    self.fail_locked(state, AssetError::Closed);
                    continue;
                }
                announced = true;
            }

            let stamp = state.access_clock + 1;
            if let Some(data) = state.store.pin(idx, stamp) {
                state.access_clock = stamp;
                return Ok(Some(PinnedChunk {
                    idx,
                    start: self.layout.start_of(idx),
                    data,
                }));
            }

            if !*waiting {
                state.store.add_waiter(idx);
                *waiting = true;
            }
            trace!(%idx, "waiting for chunk");
            self.chunk_changed.wait(state);
        }
    }

    pub(crate) fn release(&self, idx: ChunkIdx) {
        self.state.lock().store.unpin(idx);
    }

    /// Wake every blocked reader so it re-checks its own abort flag.
    pub(crate) fn wake_waiters(&self) {
        let _state = self.state.lock();
        self.chunk_changed.notify_all();
    }

    pub(crate) fn fail(&self, error: AssetError) {
        let mut state = self.state.lock();
        self.fail_locked(&mut state, error);
    }

    /// Store the terminal error (first one wins), halt all chunks, stop the
    /// run-loop and wake every reader.
    fn fail_locked(&self, state: &mut AssetState, error: AssetError) {
        if state.error.is_some() {
            return;
        }
        if error.is_closed() {
            debug!(label = %self.descriptor.label, "asset closed");
            self.bus.publish(AssetEvent::Closed);
        } else {
            warn!(label = %self.descriptor.label, %error, "asset failed");
            self.bus.publish(AssetEvent::Failed {
                error: error.to_string(),
            });
        }
        state.error = Some(error);
        state.store.halt_all();
        self.cancel.cancel();
        self.chunk_changed.notify_all();
    }
}

impl Drop for AssetShared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a streaming, encrypted media asset.
///
/// Cheap to clone. The asset stays alive while any handle or reader exists,
/// or until [`close`](Self::close) / cancellation.
#[derive(Clone)]
pub struct MediaAsset {
    shared: Arc<AssetShared>,
}

impl MediaAsset {
    /// Open an asset and start its run-loop.
    ///
    /// Chunk 0 is requested immediately so the size becomes known early.
    pub fn open(
        descriptor: AssetDescriptor,
        key: DecryptContext,
        source: Arc<dyn ChunkSource>,
        config: AssetConfig,
    ) -> AssetResult<Self> {
        let runtime = match &config.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| AssetError::NoRuntime)?,
        };
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let bus = config
            .bus
            .clone()
            .unwrap_or_else(|| EventBus::new(config.event_channel_capacity));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let state = AssetState {
            store: ChunkStore::with_resident_bytes(config.resident_bytes, config.layout),
            scheduler: FetchScheduler::new(config.scheduler_params()),
            total_size: None,
            final_chunk: ChunkIdx(0),
            latest_need: ChunkIdx(0),
            access_clock: 0,
            error: None,
        };
        let shared = Arc::new(AssetShared {
            descriptor,
            layout: config.layout,
            fetch_ahead: config.fetch_ahead,
            state: Mutex::new(state),
            chunk_changed: Condvar::new(),
            cmd_tx,
            cancel: cancel.clone(),
            bus,
        });

        debug!(
            label = %shared.descriptor.label,
            media_type = %shared.descriptor.media_type,
            header_offset = shared.descriptor.header_offset,
            chunk_bytes = config.layout.chunk_byte_size(),
            "asset opened"
        );

        let run_loop = RunLoop {
            shared: Arc::downgrade(&shared),
            cmd_rx,
            source,
            decrypt: key,
            cancel,
        };
        runtime.spawn(run_loop.run());

        // Fails only if the run-loop is already gone, which it reports itself.
        let _ = shared.cmd_tx.send(AssetCmd::Need(ChunkIdx(0)));

        Ok(Self { shared })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.descriptor.label
    }

    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.shared.descriptor.media_type
    }

    #[must_use]
    pub fn header_offset(&self) -> u64 {
        self.shared.descriptor.header_offset
    }

    #[must_use]
    pub fn layout(&self) -> ChunkLayout {
        self.shared.layout
    }

    /// New independent reader positioned at the start of the payload.
    #[must_use]
    pub fn new_reader(&self) -> StreamReader {
        StreamReader::new(Arc::clone(&self.shared))
    }

    /// Tear the asset down. Idempotent; blocked and future reads fail with
    /// [`AssetError::Closed`] unless the asset already failed.
    pub fn close(&self) {
        self.shared.fail(AssetError::Closed);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().error.is_some()
    }

    /// Terminal error, if the asset was closed or failed.
    #[must_use]
    pub fn error(&self) -> Option<AssetError> {
        self.shared.state.lock().error.clone()
    }

    /// Total file size in bytes, known once chunk 0 has arrived.
    #[must_use]
    pub fn total_size(&self) -> Option<u64> {
        self.shared.total_size()
    }

    /// Size of the playable payload (total size minus header offset).
    #[must_use]
    pub fn payload_size(&self) -> Option<u64> {
        self.total_size()
            .map(|total| total.saturating_sub(self.header_offset()))
    }

    /// Status of a resident chunk; `None` if never requested or evicted.
    #[must_use]
    pub fn chunk_status(&self, idx: ChunkIdx) -> Option<ChunkStatus> {
        self.shared.state.lock().store.get(idx).map(|c| c.status())
    }

    #[must_use]
    pub fn stats(&self) -> AssetStats {
        let state = self.shared.state.lock();
        AssetStats {
            total_size: state.total_size,
            final_chunk: state.final_chunk,
            resident_chunks: state.store.len(),
            resident_limit: state.store.resident_limit(),
            in_flight: state.scheduler.in_flight(),
            error: state.error.clone(),
        }
    }

    /// Subscribe to events of this asset's bus.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Token cancelled when the asset is torn down.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

impl fmt::Debug for MediaAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAsset")
            .field("label", &self.shared.descriptor.label)
            .field("media_type", &self.shared.descriptor.media_type)
            .field("header_offset", &self.shared.descriptor.header_offset)
            .finish_non_exhaustive()
    }
}

/// Stores `Closed` when the run-loop exits for any reason, including runtime
/// shutdown, so readers never wait on a dead asset.
struct CloseOnExit(Weak<AssetShared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Some(shared) = self.0.upgrade() {
            shared.fail(AssetError::Closed);
        }
    }
}

/// The single writer of an asset's chunk state.
struct RunLoop {
    shared: Weak<AssetShared>,
    cmd_rx: mpsc::UnboundedReceiver<AssetCmd>,
    source: Arc<dyn ChunkSource>,
    decrypt: DecryptContext,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(mut self) {
        let _close = CloseOnExit(self.shared.clone());

        loop {
            let cmd = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                cmd = self.cmd_rx.recv() => cmd,
            };
            let Some(cmd) = cmd else { break };
            let Some(shared) = self.shared.upgrade() else {
                break;
            };
            match cmd {
                AssetCmd::Need(idx) => self.on_need(&shared, idx),
                AssetCmd::Fetched { idx, result } => self.on_fetched(&shared, idx, result),
            }
        }

        trace!("asset run-loop stopped");
    }

    fn on_need(&self, shared: &AssetShared, idx: ChunkIdx) {
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        if state.error.is_some() {
            return;
        }
        state.latest_need = idx;
        self.dispatch(shared, state);
    }

    fn on_fetched(&self, shared: &AssetShared, idx: ChunkIdx, result: Result<RawChunk, FetchError>) {
        let raw = {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            if state.error.is_some() {
                trace!(%idx, "late completion dropped");
                return;
            }
            state.scheduler.on_complete();

            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    shared.fail_locked(state, e.into());
                    return;
                }
            };
            if state.total_size.is_none() && raw.total_size.is_none() {
                let e = FetchError::Malformed(format!("chunk {idx} carried no asset size"));
                shared.fail_locked(state, e.into());
                return;
            }
            if let Err(e) = state.store.mark_fetched(idx) {
                shared.fail_locked(state, e.into());
                return;
            }
            raw
        };

        let RawChunk {
            total_size,
            mut data,
        } = raw;
        decrypt_segment(&self.decrypt, shared.layout.start_of(idx), &mut data);
        let len = data.len();

        let mut guard = shared.state.lock();
        let state = &mut *guard;
        if state.error.is_some() {
            return;
        }

        if let Some(total) = total_size
            && state.total_size.is_none()
        {
            state.total_size = Some(total);
            state.final_chunk = shared.layout.final_chunk(total);
            debug!(total, final_chunk = %state.final_chunk, "asset size known");
            shared.bus.publish(AssetEvent::SizeKnown {
                total_bytes: total,
                final_chunk: state.final_chunk.0,
            });
        }

        if let Err(e) = state.store.mark_ready(idx, Bytes::from(data), state.access_clock) {
            shared.fail_locked(state, e.into());
            return;
        }
        trace!(%idx, len, "chunk ready");
        shared.bus.publish(AssetEvent::ChunkReady { idx: idx.0, len });

        let protect = state.latest_need..=state.latest_need.ahead(shared.fetch_ahead);
        for evicted in state.store.evict_over_limit(protect) {
            shared.bus.publish(AssetEvent::ChunkEvicted { idx: evicted.0 });
        }

        self.dispatch(shared, state);
        drop(guard);
        shared.chunk_changed.notify_all();
    }

    /// Start at most one fetch, as planned by the scheduler.
    fn dispatch(&self, shared: &AssetShared, state: &mut AssetState) {
        let Some(dispatch) =
            state
                .scheduler
                .plan(&state.store, state.latest_need, state.final_chunk)
        else {
            return;
        };
        if let Err(e) = state.store.put(dispatch.idx) {
            shared.fail_locked(state, e.into());
            return;
        }
        state.scheduler.on_dispatch();

        trace!(
            idx = %dispatch.idx,
            ahead = dispatch.ahead,
            in_flight = state.scheduler.in_flight(),
            "chunk requested"
        );
        shared.bus.publish(AssetEvent::ChunkRequested {
            idx: dispatch.idx.0,
            read_ahead: dispatch.is_read_ahead(),
        });

        let idx = dispatch.idx;
        let source = Arc::clone(&self.source);
        let tx = shared.cmd_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = source.fetch_chunk(idx) => result,
            };
            let _ = tx.send(AssetCmd::Fetched { idx, result });
        });
    }
}
