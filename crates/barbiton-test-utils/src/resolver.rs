//! Fixed track metadata for downloader tests.

use std::collections::HashMap;

use async_trait::async_trait;
use barbiton_net::{NetError, NetResult, TrackId, TrackInfo, TrackResolver};
use parking_lot::Mutex;

#[derive(Default)]
pub struct StaticTrackResolver {
    tracks: Mutex<HashMap<TrackId, TrackInfo>>,
}

impl StaticTrackResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: TrackId, info: TrackInfo) {
        self.tracks.lock().insert(track, info);
    }
}

#[async_trait]
impl TrackResolver for StaticTrackResolver {
    async fn resolve_track(&self, track: &TrackId) -> NetResult<TrackInfo> {
        self.tracks
            .lock()
            .get(track)
            .cloned()
            .ok_or_else(|| NetError::Resolve(format!("unknown track {track}")))
    }
}
