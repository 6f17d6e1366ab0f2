#![forbid(unsafe_code)]

//! Configuration for [`Downloader`](crate::Downloader).

use barbiton_events::EventBus;
use barbiton_net::{AudioFormat, NetOptions};
use barbiton_stream::AssetConfig;
use tokio_util::sync::CancellationToken;

/// Settings shared by every asset a downloader pins.
///
/// # Example
///
/// ```ignore
/// use barbiton::DownloaderConfig;
/// use barbiton::net::AudioFormat;
///
/// let config = DownloaderConfig::default()
///     .with_format(AudioFormat::Mp3_320)
///     .with_fetch_ahead(8);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DownloaderConfig {
    /// Preferred encoding. Only files in exactly this format are pinned.
    pub format: AudioFormat,
    /// Template for every pinned asset.
    pub asset: AssetConfig,
    /// Request timeouts of the packet router.
    pub net: NetOptions,
}

impl DownloaderConfig {
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_asset(mut self, asset: AssetConfig) -> Self {
        self.asset = asset;
        self
    }

    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Set a parent cancellation token for every pinned asset.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.asset.cancel = Some(cancel);
        self
    }

    /// Publish router and asset events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.asset.bus = Some(bus);
        self
    }

    /// Set how many chunks past the one being read each asset may request.
    pub fn with_fetch_ahead(mut self, chunks: u32) -> Self {
        self.asset.fetch_ahead = chunks;
        self
    }
}
