//! `barbiton-stream`
//!
//! Streaming access to a remote, chunked, encrypted media asset.
//!
//! ## Design
//! - [`MediaAsset`]: owns the chunk store; one run-loop task per asset is the
//!   only writer of chunk state, draining fetch completions and reader demand
//!   from a single command queue.
//! - [`FetchScheduler`]: read-ahead window and concurrency cap.
//! - [`StreamReader`]: sync `Read + Seek` cursor. Blocks only the calling
//!   thread, on a condvar broadcast by the run-loop.
//! - [`ChunkSource`]: the network seam; one async fetch per chunk.

#![forbid(unsafe_code)]

mod asset;
mod config;
mod error;
mod reader;
mod scheduler;
mod source;

pub use asset::{AssetDescriptor, AssetStats, MediaAsset};
pub use barbiton_storage::{ChunkIdx, ChunkLayout, ChunkStatus};
pub use config::AssetConfig;
pub use error::{AssetError, AssetResult, FetchError};
pub use reader::{ReaderCloser, StreamReader};
pub use scheduler::{Dispatch, FetchScheduler, SchedulerParams};
pub use source::{ChunkSource, RawChunk};
