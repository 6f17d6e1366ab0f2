#![forbid(unsafe_code)]

//! Track pinning: metadata, file choice, key exchange and asset start-up.

use std::{fmt, sync::Arc};

use barbiton_drm::DecryptContext;
use barbiton_net::{
    AudioFile, AudioFormat, NetChunkSource, NetError, NetResult, PacketRouter, PacketSink, TrackId,
    TrackInfo, TrackResolver,
};
use barbiton_stream::{AssetDescriptor, MediaAsset};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{DownloaderConfig, PinResult};

/// Label of a pinned asset: `"<artist> - <track> (<id>)<ext>"`.
///
/// Tracks without artists are labelled `"<track> (<id>)<ext>"`.
#[must_use]
pub fn asset_label(info: &TrackInfo, track: &TrackId, format: AudioFormat) -> String {
    let id = track.to_base62();
    let ext = format.extension();
    match info.first_artist() {
        Some(artist) => format!("{artist} - {} ({id}){ext}", info.name),
        None => format!("{} ({id}){ext}", info.name),
    }
}

/// Entry point of the pipeline.
///
/// Owns the [`PacketRouter`] of one session. Every inbound session packet
/// must be handed to [`Downloader::handle_packet`]; packets unrelated to
/// chunks and keys are ignored.
pub struct Downloader {
    router: Arc<PacketRouter>,
    resolver: Arc<dyn TrackResolver>,
    format: Mutex<AudioFormat>,
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(
        sink: Arc<dyn PacketSink>,
        resolver: Arc<dyn TrackResolver>,
        config: DownloaderConfig,
    ) -> Self {
        let mut router = PacketRouter::new(sink).with_options(config.net.clone());
        if let Some(bus) = &config.asset.bus {
            router = router.with_events(bus.clone());
        }
        Self {
            router: Arc::new(router),
            resolver,
            format: Mutex::new(config.format),
            config,
        }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<PacketRouter> {
        &self.router
    }

    #[must_use]
    pub fn audio_format(&self) -> AudioFormat {
        *self.format.lock()
    }

    /// Format used by subsequent [`pin_track`](Self::pin_track) calls.
    pub fn set_audio_format(&self, format: AudioFormat) {
        *self.format.lock() = format;
        debug!(%format, "audio format set");
    }

    /// Route one inbound session packet.
    pub fn handle_packet(&self, cmd: u8, payload: &[u8]) -> NetResult<()> {
        self.router.handle_packet(cmd, payload)
    }

    /// Resolve `uri`, fetch its key and start streaming it.
    ///
    /// The returned asset is already fetching chunk 0; readers may be
    /// created right away.
    pub async fn pin_track(&self, uri: &str) -> PinResult<MediaAsset> {
        let track = TrackId::from_uri(uri)?;
        let info = self.resolver.resolve_track(&track).await?;
        let format = self.audio_format();
        let file = choose_file(&info, format)?;

        let descriptor = AssetDescriptor::new(
            asset_label(&info, &track, file.format),
            file.format.media_type(),
        )
        .with_header_offset(file.format.header_offset());

        let key = self.router.request_key(&track, &file.file_id).await?;
        let key = DecryptContext::from_key_bytes(&key)?;

        let layout = self.config.asset.layout;
        let source = Arc::new(NetChunkSource::new(
            Arc::clone(&self.router),
            file.file_id,
            layout,
        ));
        let asset = MediaAsset::open(descriptor, key, source, self.config.asset.clone())?;

        info!(
            %track,
            file_id = %file.file_id,
            %format,
            label = asset.label(),
            "track pinned"
        );
        Ok(asset)
    }
}

fn choose_file(info: &TrackInfo, format: AudioFormat) -> NetResult<AudioFile> {
    info.choose_file(format)
        .copied()
        .ok_or(NetError::NoMatchingFile(format))
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("router", &self.router)
            .field("format", &self.audio_format())
            .finish_non_exhaustive()
    }
}
