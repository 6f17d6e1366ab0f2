#![forbid(unsafe_code)]

//! Shared test utilities for the barbiton workspace.

pub mod fixtures;
pub mod loopback;
pub mod memory_source;
pub mod resolver;
pub mod rng;

pub use fixtures::*;
pub use loopback::LoopbackServer;
pub use memory_source::MemoryChunkSource;
pub use resolver::StaticTrackResolver;
pub use rng::*;
