#![forbid(unsafe_code)]

use barbiton_events::EventBus;
use barbiton_storage::{ChunkLayout, DEFAULT_RESIDENT_BYTES};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::SchedulerParams;

/// Default number of chunks fetched ahead of the chunk being read.
pub const DEFAULT_FETCH_AHEAD: u32 = 4;

/// Default cap on concurrent read-ahead fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 1;

/// Configuration of one media asset.
///
/// Used with `MediaAsset::open(descriptor, key, source, config)`.
#[derive(Clone, Debug)]
pub struct AssetConfig {
    /// Cancellation token. The asset derives a child token from it, so
    /// cancelling the parent tears the asset down but closing the asset
    /// never cancels the parent.
    pub cancel: Option<CancellationToken>,
    /// Event bus channel capacity (used when `bus` is not provided).
    pub event_channel_capacity: usize,
    /// Event bus (optional - if not provided, one is created internally).
    pub bus: Option<EventBus>,
    /// Chunk geometry.
    pub layout: ChunkLayout,
    /// How many chunks past the one being read may be requested.
    pub fetch_ahead: u32,
    /// Cap on read-ahead fetches in flight. The chunk a reader is blocked on
    /// is always requested regardless of this cap.
    pub max_concurrent_fetches: usize,
    /// Resident memory budget in bytes (soft; pinned and in-flight chunks
    /// are never evicted).
    pub resident_bytes: u64,
    /// Runtime driving the run-loop. When `None`, the current runtime is used.
    pub runtime: Option<Handle>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            cancel: None,
            event_channel_capacity: 16,
            bus: None,
            layout: ChunkLayout::default(),
            fetch_ahead: DEFAULT_FETCH_AHEAD,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            resident_bytes: DEFAULT_RESIDENT_BYTES,
            runtime: None,
        }
    }
}

impl AssetConfig {
    /// Set cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set event bus for subscribing to asset events.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set event bus channel capacity.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: ChunkLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the chunk size in bytes (rounded down to whole words).
    #[must_use]
    pub fn with_chunk_byte_size(mut self, bytes: u64) -> Self {
        self.layout = ChunkLayout::new(bytes);
        self
    }

    #[must_use]
    pub fn with_fetch_ahead(mut self, chunks: u32) -> Self {
        self.fetch_ahead = chunks;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, fetches: usize) -> Self {
        self.max_concurrent_fetches = fetches;
        self
    }

    /// Set resident memory budget in bytes.
    #[must_use]
    pub fn with_resident_bytes(mut self, bytes: u64) -> Self {
        self.resident_bytes = bytes;
        self
    }

    /// Set the runtime that drives the asset run-loop.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub(crate) fn scheduler_params(&self) -> SchedulerParams {
        SchedulerParams {
            fetch_ahead: self.fetch_ahead,
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}
