#![forbid(unsafe_code)]

use std::{collections::HashMap, ops::RangeInclusive};

use bytes::Bytes;
use tracing::trace;

use crate::{Chunk, ChunkIdx, ChunkLayout, ChunkStatus, StorageError, StorageResult};

/// Default resident memory budget per asset (10 MiB).
pub const DEFAULT_RESIDENT_BYTES: u64 = 10 * 1024 * 1024;

/// Number of chunks kept resident for a byte budget.
///
/// Always leaves headroom for a few chunks beyond the budget so the read-ahead
/// window never competes with the chunk being read.
#[must_use]
pub fn resident_limit_for_bytes(bytes: u64, layout: ChunkLayout) -> usize {
    let chunks = bytes / layout.chunk_byte_size();
    6 + usize::try_from(chunks).unwrap_or(usize::MAX - 6)
}

/// Index-keyed chunk map of one asset.
///
/// The store only enforces per-chunk state transitions; it performs no I/O
/// and no locking. The owner serializes access.
#[derive(Debug)]
pub struct ChunkStore {
    chunks: HashMap<ChunkIdx, Chunk>,
    /// Readers blocked on each index; such chunks are never evicted.
    waiters: HashMap<ChunkIdx, u32>,
    resident_limit: usize,
}

impl ChunkStore {
    #[must_use]
    pub fn new(resident_limit: usize) -> Self {
        Self {
            chunks: HashMap::with_capacity(resident_limit.min(70)),
            waiters: HashMap::new(),
            resident_limit: resident_limit.max(1),
        }
    }

    #[must_use]
    pub fn with_resident_bytes(bytes: u64, layout: ChunkLayout) -> Self {
        Self::new(resident_limit_for_bytes(bytes, layout))
    }

    #[must_use]
    pub fn resident_limit(&self) -> usize {
        self.resident_limit
    }

    /// Number of resident chunks (any status).
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn get(&self, idx: ChunkIdx) -> Option<&Chunk> {
        self.chunks.get(&idx)
    }

    #[must_use]
    pub fn contains(&self, idx: ChunkIdx) -> bool {
        self.chunks.contains_key(&idx)
    }

    /// The chunk at `idx`, only if it is fully decrypted.
    #[must_use]
    pub fn get_ready(&self, idx: ChunkIdx) -> Option<&Chunk> {
        self.chunks
            .get(&idx)
            .filter(|c| c.status() == ChunkStatus::Ready)
    }

    /// Insert a fresh `InProgress` chunk for a fetch that is being dispatched.
    pub fn put(&mut self, idx: ChunkIdx) -> StorageResult<()> {
        if self.chunks.contains_key(&idx) {
            return Err(StorageError::AlreadyPresent(idx));
        }
        self.chunks.insert(idx, Chunk::in_progress(idx));
        Ok(())
    }

    /// `InProgress -> ReadyToDecrypt`.
    pub fn mark_fetched(&mut self, idx: ChunkIdx) -> StorageResult<()> {
        self.transition(idx, ChunkStatus::InProgress, ChunkStatus::ReadyToDecrypt)?;
        Ok(())
    }

    /// `ReadyToDecrypt -> Ready`, publishing the plaintext.
    ///
    /// `stamp` is the current access clock, so a fresh chunk is never the
    /// oldest eviction candidate.
    pub fn mark_ready(&mut self, idx: ChunkIdx, data: Bytes, stamp: u64) -> StorageResult<()> {
        let chunk = self.transition(idx, ChunkStatus::ReadyToDecrypt, ChunkStatus::Ready)?;
        chunk.set_data(data);
        chunk.touch(stamp);
        Ok(())
    }

    /// Register a reader blocked on `idx`.
    pub fn add_waiter(&mut self, idx: ChunkIdx) {
        *self.waiters.entry(idx).or_default() += 1;
    }

    pub fn remove_waiter(&mut self, idx: ChunkIdx) {
        if let Some(count) = self.waiters.get_mut(&idx) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.waiters.remove(&idx);
            }
        }
    }

    #[must_use]
    pub fn waiters(&self, idx: ChunkIdx) -> u32 {
        self.waiters.get(&idx).copied().unwrap_or(0)
    }

    /// Move every resident chunk to `Halted`.
    pub fn halt_all(&mut self) {
        for chunk in self.chunks.values_mut() {
            chunk.set_status(ChunkStatus::Halted);
        }
    }

    /// Pin a ready chunk for a reader, stamping it as most recently used.
    ///
    /// Returns the shared plaintext, or `None` if the chunk is not ready.
    pub fn pin(&mut self, idx: ChunkIdx, stamp: u64) -> Option<Bytes> {
        let chunk = self
            .chunks
            .get_mut(&idx)
            .filter(|c| c.status() == ChunkStatus::Ready)?;
        chunk.pin(stamp);
        Some(chunk.data().clone())
    }

    /// Release one reader pin. Unknown indices are ignored.
    pub fn unpin(&mut self, idx: ChunkIdx) {
        if let Some(chunk) = self.chunks.get_mut(&idx) {
            chunk.unpin();
        }
    }

    /// Evict ready, unpinned chunks while over the resident limit.
    ///
    /// Oldest access stamp goes first. Chunk 0 (asset header), chunks inside
    /// `protect` (the active read-ahead window) and chunks a reader is
    /// waiting on are never evicted, nor are chunks still in flight.
    pub fn evict_over_limit(&mut self, protect: RangeInclusive<ChunkIdx>) -> Vec<ChunkIdx> {
        let excess = self.chunks.len().saturating_sub(self.resident_limit);
        if excess == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, ChunkIdx)> = self
            .chunks
            .values()
            .filter(|c| {
                c.status() == ChunkStatus::Ready
                    && c.readers() == 0
                    && c.idx() != ChunkIdx(0)
                    && !protect.contains(&c.idx())
                    && !self.waiters.contains_key(&c.idx())
            })
            .map(|c| (c.access_stamp(), c.idx()))
            .collect();
        candidates.sort_unstable();

        let evicted: Vec<ChunkIdx> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, idx)| idx)
            .collect();
        for idx in &evicted {
            self.chunks.remove(idx);
            trace!(%idx, "chunk evicted");
        }
        evicted
    }

    fn transition(
        &mut self,
        idx: ChunkIdx,
        from: ChunkStatus,
        to: ChunkStatus,
    ) -> StorageResult<&mut Chunk> {
        let chunk = self
            .chunks
            .get_mut(&idx)
            .ok_or(StorageError::Missing(idx))?;
        if chunk.status() != from {
            return Err(StorageError::InvalidTransition {
                idx,
                from: chunk.status(),
                to,
            });
        }
        chunk.set_status(to);
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    fn ready(store: &mut ChunkStore, idx: u32, data: &'static [u8]) {
        let idx = ChunkIdx(idx);
        store.put(idx).unwrap();
        store.mark_fetched(idx).unwrap();
        store.mark_ready(idx, Bytes::from_static(data), 0).unwrap();
    }

    #[fixture]
    fn store() -> ChunkStore {
        ChunkStore::new(3)
    }

    #[rstest]
    fn put_starts_in_progress(mut store: ChunkStore) {
        store.put(ChunkIdx(2)).unwrap();
        assert_eq!(
            store.get(ChunkIdx(2)).map(Chunk::status),
            Some(ChunkStatus::InProgress)
        );
        assert!(store.get_ready(ChunkIdx(2)).is_none());
        assert!(store.get(ChunkIdx(3)).is_none());
    }

    #[rstest]
    fn put_twice_is_rejected(mut store: ChunkStore) {
        store.put(ChunkIdx(1)).unwrap();
        assert_eq!(
            store.put(ChunkIdx(1)),
            Err(StorageError::AlreadyPresent(ChunkIdx(1)))
        );
    }

    #[rstest]
    fn full_lifecycle_reaches_ready(mut store: ChunkStore) {
        ready(&mut store, 0, b"plain");
        let chunk = store.get_ready(ChunkIdx(0)).unwrap();
        assert_eq!(chunk.data().as_ref(), b"plain");
    }

    #[rstest]
    fn ready_cannot_skip_decrypt(mut store: ChunkStore) {
        store.put(ChunkIdx(0)).unwrap();
        let err = store
            .mark_ready(ChunkIdx(0), Bytes::from_static(b"x"), 0)
            .unwrap_err();
        assert_eq!(
            err,
            StorageError::InvalidTransition {
                idx: ChunkIdx(0),
                from: ChunkStatus::InProgress,
                to: ChunkStatus::Ready,
            }
        );
    }

    #[rstest]
    fn fetched_twice_is_rejected(mut store: ChunkStore) {
        store.put(ChunkIdx(0)).unwrap();
        store.mark_fetched(ChunkIdx(0)).unwrap();
        assert!(store.mark_fetched(ChunkIdx(0)).is_err());
    }

    #[rstest]
    fn transition_on_missing_chunk(mut store: ChunkStore) {
        assert_eq!(
            store.mark_fetched(ChunkIdx(9)),
            Err(StorageError::Missing(ChunkIdx(9)))
        );
    }

    #[rstest]
    fn halt_all_halts_every_state(mut store: ChunkStore) {
        ready(&mut store, 0, b"a");
        store.put(ChunkIdx(1)).unwrap();
        store.halt_all();
        assert_eq!(store.get(ChunkIdx(0)).unwrap().status(), ChunkStatus::Halted);
        assert_eq!(store.get(ChunkIdx(1)).unwrap().status(), ChunkStatus::Halted);
        assert!(store.pin(ChunkIdx(0), 1).is_none());
    }

    #[rstest]
    fn pin_counts_readers(mut store: ChunkStore) {
        ready(&mut store, 1, b"abc");
        assert_eq!(store.pin(ChunkIdx(1), 7).unwrap().as_ref(), b"abc");
        store.pin(ChunkIdx(1), 8);
        let chunk = store.get(ChunkIdx(1)).unwrap();
        assert_eq!(chunk.readers(), 2);
        assert_eq!(chunk.access_stamp(), 8);

        store.unpin(ChunkIdx(1));
        store.unpin(ChunkIdx(1));
        store.unpin(ChunkIdx(1));
        assert_eq!(store.get(ChunkIdx(1)).unwrap().readers(), 0);
    }

    #[rstest]
    fn pin_in_progress_is_none(mut store: ChunkStore) {
        store.put(ChunkIdx(1)).unwrap();
        assert!(store.pin(ChunkIdx(1), 1).is_none());
    }

    #[test]
    fn eviction_takes_oldest_unpinned() {
        let mut store = ChunkStore::new(2);
        for idx in 0..5 {
            ready(&mut store, idx, b"x");
        }
        store.pin(ChunkIdx(1), 10);
        store.unpin(ChunkIdx(1));
        store.pin(ChunkIdx(2), 5);
        store.unpin(ChunkIdx(2));
        store.pin(ChunkIdx(3), 20);

        let evicted = store.evict_over_limit(ChunkIdx(9)..=ChunkIdx(9));

        // 5 resident, limit 2: three go. Chunk 0 is protected, 3 is pinned.
        assert_eq!(evicted, vec![ChunkIdx(4), ChunkIdx(2), ChunkIdx(1)]);
        assert!(store.contains(ChunkIdx(0)));
        assert!(store.contains(ChunkIdx(3)));
    }

    #[test]
    fn eviction_skips_read_ahead_window_and_in_flight() {
        let mut store = ChunkStore::new(1);
        ready(&mut store, 1, b"x");
        ready(&mut store, 2, b"x");
        store.put(ChunkIdx(3)).unwrap();

        let evicted = store.evict_over_limit(ChunkIdx(2)..=ChunkIdx(6));
        assert_eq!(evicted, vec![ChunkIdx(1)]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn eviction_skips_chunks_with_waiters() {
        let mut store = ChunkStore::new(1);
        ready(&mut store, 1, b"x");
        ready(&mut store, 2, b"x");
        store.add_waiter(ChunkIdx(1));
        store.add_waiter(ChunkIdx(1));

        assert_eq!(
            store.evict_over_limit(ChunkIdx(9)..=ChunkIdx(9)),
            vec![ChunkIdx(2)]
        );

        store.remove_waiter(ChunkIdx(1));
        assert_eq!(store.waiters(ChunkIdx(1)), 1);
        ready(&mut store, 3, b"x");
        assert_eq!(
            store.evict_over_limit(ChunkIdx(9)..=ChunkIdx(9)),
            vec![ChunkIdx(3)]
        );

        store.remove_waiter(ChunkIdx(1));
        assert_eq!(store.waiters(ChunkIdx(1)), 0);
        assert_eq!(
            store.evict_over_limit(ChunkIdx(9)..=ChunkIdx(9)),
            Vec::<ChunkIdx>::new()
        );
    }

    #[test]
    fn fresh_chunk_is_not_oldest() {
        let mut store = ChunkStore::new(1);
        ready(&mut store, 1, b"x");
        store.pin(ChunkIdx(1), 5);
        store.unpin(ChunkIdx(1));

        let idx = ChunkIdx(2);
        store.put(idx).unwrap();
        store.mark_fetched(idx).unwrap();
        store.mark_ready(idx, Bytes::from_static(b"y"), 6).unwrap();
        assert_eq!(store.get(idx).unwrap().access_stamp(), 6);

        assert_eq!(
            store.evict_over_limit(ChunkIdx(9)..=ChunkIdx(9)),
            vec![ChunkIdx(1)]
        );
    }

    #[test]
    fn eviction_noop_under_limit() {
        let mut store = ChunkStore::new(4);
        ready(&mut store, 1, b"x");
        assert!(store.evict_over_limit(ChunkIdx(0)..=ChunkIdx(0)).is_empty());
    }

    #[test]
    fn resident_limit_from_bytes() {
        assert_eq!(
            resident_limit_for_bytes(DEFAULT_RESIDENT_BYTES, ChunkLayout::default()),
            6 + 80
        );
        assert_eq!(resident_limit_for_bytes(1000, ChunkLayout::new(100)), 16);
    }
}
