#![forbid(unsafe_code)]

//! Sync reader over a media asset.
//!
//! `StreamReader` implements `Read + Seek` for decoders. Reads block only the
//! calling thread, waiting on the asset's condvar until the chunk under the
//! cursor is decrypted. Each reader pins at most one chunk at a time.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use barbiton_storage::ChunkIdx;
use parking_lot::Mutex;
use tracing::trace;

use crate::asset::{AssetShared, PinnedChunk};

fn reader_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "reader closed")
}

struct ReaderShared {
    asset: Arc<AssetShared>,
    closed: AtomicBool,
    pinned: Mutex<Option<PinnedChunk>>,
}

impl ReaderShared {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(reader_closed());
        }
        self.asset.check().map_err(io::Error::from)
    }

    fn pinned_at(&self, idx: ChunkIdx) -> Option<PinnedChunk> {
        self.pinned
            .lock()
            .as_ref()
            .filter(|chunk| chunk.idx == idx)
            .cloned()
    }

    /// Swap the pinned chunk: the new pin is already held, the old one is
    /// released. A reader closed meanwhile releases the new pin instead.
    fn repin(&self, chunk: PinnedChunk) -> io::Result<()> {
        let mut pinned = self.pinned.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(pinned);
            self.asset.release(chunk.idx);
            return Err(reader_closed());
        }
        let previous = pinned.replace(chunk);
        drop(pinned);
        if let Some(previous) = previous {
            self.asset.release(previous.idx);
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = self.pinned.lock().take();
        if let Some(previous) = previous {
            self.asset.release(previous.idx);
        }
        self.asset.wake_waiters();
        trace!("reader closed");
    }
}

/// Handle that closes a [`StreamReader`] from another thread, e.g. while a
/// read is blocked.
#[derive(Clone)]
pub struct ReaderCloser {
    shared: Arc<ReaderShared>,
}

impl ReaderCloser {
    /// Close the reader. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ReaderCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderCloser")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Seekable cursor over the decrypted payload of a [`MediaAsset`](crate::MediaAsset).
///
/// Positions reported by `seek` are relative to the payload start, i.e. the
/// asset's header offset is hidden. Dropping the reader closes it.
pub struct StreamReader {
    shared: Arc<ReaderShared>,
    /// Absolute byte position in the file, header included.
    pos: u64,
}

impl StreamReader {
    pub(crate) fn new(asset: Arc<AssetShared>) -> Self {
        let pos = asset.header_offset();
        Self {
            shared: Arc::new(ReaderShared {
                asset,
                closed: AtomicBool::new(false),
                pinned: Mutex::new(None),
            }),
            pos,
        }
    }

    /// Position relative to the payload start.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos.saturating_sub(self.shared.asset.header_offset())
    }

    #[must_use]
    pub fn closer(&self) -> ReaderCloser {
        ReaderCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Close the reader and release its pinned chunk. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Block until the asset size is known.
    fn ensure_size(&self) -> io::Result<()> {
        self.shared.ensure_open()?;
        if let Some(first) = self.shared.asset.wait_first_chunk(&self.shared.closed)? {
            self.shared.repin(first)?;
        }
        Ok(())
    }

    /// Chunk under `pos`, or `None` past the end of the asset.
    fn chunk_at(&self, pos: u64) -> io::Result<Option<PinnedChunk>> {
        let idx = self.shared.asset.layout().chunk_at(pos);
        if let Some(chunk) = self.shared.pinned_at(idx) {
            return Ok(Some(chunk));
        }
        let Some(chunk) = self.shared.asset.acquire(idx, &self.shared.closed)? else {
            return Ok(None);
        };
        self.shared.repin(chunk.clone())?;
        Ok(Some(chunk))
    }

    /// Copy from the chunk under the cursor. `Ok(0)` means end of asset.
    fn read_step(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(chunk) = self.chunk_at(self.pos)? else {
            return Ok(0);
        };
        let rel = usize::try_from(self.pos - chunk.start).unwrap_or(usize::MAX);
        let available = chunk.data.len().saturating_sub(rel);
        if available == 0 {
            if chunk.idx >= self.shared.asset.final_chunk() {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "chunk {} holds {} bytes, short of offset {rel}",
                    chunk.idx,
                    chunk.data.len()
                ),
            ));
        }
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&chunk.data[rel..rel + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_size()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.pos = self.pos.max(self.shared.asset.header_offset());

        let mut filled = 0;
        while filled < buf.len() {
            match self.read_step(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                // Hand out what was copied; the error resurfaces next call.
                Err(e) if filled > 0 => {
                    trace!(error = %e, filled, "read cut short");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        trace!(pos = self.pos, filled, "read");
        Ok(filled)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.shared.ensure_open()?;
        let header_offset = self.shared.asset.header_offset();
        let target: i128 = match pos {
            SeekFrom::Start(n) => i128::from(header_offset) + i128::from(n),
            SeekFrom::Current(delta) => {
                i128::from(self.pos.max(header_offset)) + i128::from(delta)
            }
            SeekFrom::End(delta) => {
                self.ensure_size()?;
                // A file shorter than its header has an empty payload.
                let end = self
                    .shared
                    .asset
                    .total_size()
                    .unwrap_or(header_offset)
                    .max(header_offset);
                i128::from(end) + i128::from(delta)
            }
        };

        if target < i128::from(header_offset) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek before start of payload: {pos:?}"),
            ));
        }
        let target = u64::try_from(target).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek position overflow: {pos:?}"),
            )
        })?;

        self.pos = target;
        trace!(?pos, target, "seek");
        Ok(target - header_offset)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("pos", &self.pos)
            .field("closed", &self.is_closed())
            .finish()
    }
}
