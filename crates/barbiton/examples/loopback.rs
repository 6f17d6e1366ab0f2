//! Example: pin a track served by an in-process loopback session.
//!
//! Demonstrates the top-level `Downloader` API:
//! - `Downloader::new(sink, resolver, config)` wires a packet router
//! - `pin_track(uri)` resolves metadata, fetches the key and opens the asset
//! - `MediaAsset::new_reader()` yields a blocking `Read + Seek` cursor
//!
//! Run with:
//! ```
//! RUST_LOG=barbiton_stream=trace cargo run -p barbiton --example loopback
//! ```

use std::{
    error::Error,
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};

use barbiton::prelude::*;
use barbiton::{
    net::{AudioFile, FileId},
    storage::ChunkLayout,
};
use barbiton_test_utils::{LoopbackServer, StaticTrackResolver, TEST_KEY, payload};
use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
                .add_directive("barbiton_net=info".parse()?),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let file_id = FileId::new([0x11; 20]);
    let track = TrackId::from_gid([0x22; 16]);
    let plain = payload(5 * 131_072 + 4000, 7);

    let server = Arc::new(LoopbackServer::new());
    server.add_file(file_id, &plain, ChunkLayout::default(), TEST_KEY);
    let resolver = Arc::new(StaticTrackResolver::new());
    resolver.insert(
        track,
        TrackInfo {
            name: "Loopback".into(),
            artists: vec!["Barbiton".into()],
            files: vec![AudioFile {
                file_id,
                format: AudioFormat::OggVorbis160,
            }],
            alternatives: Vec::new(),
        },
    );

    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            info!(?ev);
        }
    });

    let downloader = Downloader::new(
        server.clone(),
        resolver,
        DownloaderConfig::default().with_events(bus),
    );
    server.attach(downloader.router());

    let asset = downloader.pin_track(&track.to_uri()).await?;
    info!(label = asset.label(), media_type = asset.media_type(), "pinned");

    let mut reader = asset.new_reader();
    let read = tokio::task::spawn_blocking(move || {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head)?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut all = Vec::new();
        reader.read_to_end(&mut all)?;
        Ok::<_, std::io::Error>((end, all.len()))
    });
    let (end, len) = read.await??;

    info!(payload_bytes = end, read_bytes = len, stats = ?asset.stats(), "done");
    asset.close();
    Ok(())
}
