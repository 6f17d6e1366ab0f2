#![forbid(unsafe_code)]

//! # Barbiton
//!
//! Facade crate: pin a remote track and read it as a seekable, decrypted
//! byte stream while chunks are still arriving.
//!
//! ## Quick start
//!
//! ```ignore
//! use barbiton::prelude::*;
//!
//! let downloader = Downloader::new(session, resolver, DownloaderConfig::default());
//! // Feed every inbound session packet to `downloader.handle_packet(cmd, payload)`.
//!
//! let asset = downloader.pin_track("spotify:track:4uLU6hMCjMI75M1A2tKUQC").await?;
//! let mut reader = asset.new_reader();
//! std::io::copy(&mut reader, &mut decoder_input)?;
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod drm {
    pub use barbiton_drm::*;
}

pub mod events {
    pub use barbiton_events::*;
}

pub mod net {
    pub use barbiton_net::*;
}

pub mod storage {
    pub use barbiton_storage::*;
}

pub mod stream {
    pub use barbiton_stream::*;
}

// ── Downloader ──────────────────────────────────────────────────────────

mod config;
mod downloader;
mod error;

pub use config::DownloaderConfig;
pub use downloader::{Downloader, asset_label};
pub use error::{PinError, PinResult};

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use barbiton_events::{AssetEvent, Event, EventBus, NetEvent};
    pub use barbiton_net::{
        AudioFormat, NetOptions, PacketSink, PacketType, TrackId, TrackInfo, TrackResolver,
    };
    pub use barbiton_stream::{AssetConfig, AssetError, MediaAsset, ReaderCloser, StreamReader};

    pub use crate::{Downloader, DownloaderConfig, PinError};
}
