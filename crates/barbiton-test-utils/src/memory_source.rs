//! In-memory [`ChunkSource`] with gating and failure injection.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use barbiton_drm::DecryptContext;
use barbiton_storage::{ChunkIdx, ChunkLayout};
use barbiton_stream::{ChunkSource, FetchError, RawChunk};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::encrypt_chunks;

/// Serves a plaintext file, encrypted per chunk, from memory.
///
/// Fetches park while the source is held, so tests can observe blocked
/// readers and in-flight counts deterministically.
pub struct MemoryChunkSource {
    ciphertext: Vec<u8>,
    layout: ChunkLayout,
    send_size: bool,
    delay: Option<Duration>,
    gate: watch::Sender<bool>,
    failures: Mutex<HashMap<ChunkIdx, FetchError>>,
    requests: Mutex<Vec<ChunkIdx>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryChunkSource {
    #[must_use]
    pub fn new(plaintext: &[u8], layout: ChunkLayout, key: &DecryptContext) -> Self {
        Self {
            ciphertext: encrypt_chunks(plaintext, layout, key),
            layout,
            send_size: true,
            delay: None,
            gate: watch::Sender::new(true),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Omit the total size from every response.
    #[must_use]
    pub fn without_size(mut self) -> Self {
        self.send_size = false;
        self
    }

    /// Delay every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Park all fetches (current and future) until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Make every fetch of `idx` fail with `error`.
    pub fn fail_chunk(&self, idx: ChunkIdx, error: FetchError) {
        self.failures.lock().insert(idx, error);
    }

    /// Every fetch started so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChunkIdx> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self, idx: ChunkIdx) -> usize {
        self.requests.lock().iter().filter(|&&r| r == idx).count()
    }

    /// Highest number of fetches that were parked or running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` fetches have started.
    pub async fn wait_for_requests(&self, n: usize) {
        while self.requests.lock().len() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn respond(&self, idx: ChunkIdx) -> Result<RawChunk, FetchError> {
        if let Some(error) = self.failures.lock().get(&idx).cloned() {
            return Err(error);
        }
        let total = self.ciphertext.len();
        let start = usize::try_from(self.layout.start_of(idx)).unwrap_or(usize::MAX);
        if start > total {
            return Err(FetchError::Malformed(format!("chunk {idx} past end of file")));
        }
        let size = usize::try_from(self.layout.chunk_byte_size()).unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(total);
        Ok(RawChunk {
            total_size: self.send_size.then_some(total as u64),
            data: self.ciphertext[start..end].to_vec(),
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn fetch_chunk(&self, idx: ChunkIdx) -> Result<RawChunk, FetchError> {
        self.requests.lock().push(idx);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(FetchError::Abandoned);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(idx)
    }
}
