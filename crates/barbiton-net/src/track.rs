//! Track and file identifiers, and the track metadata the downloader needs.

use std::fmt;

use crate::{AudioFormat, NetError, NetResult};

pub const TRACK_URI_PREFIX: &str = "spotify:track:";

const BASE62: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const BASE62_LEN: usize = 22;

/// 128-bit track id; 22 base62 characters in URIs, 16 bytes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackId {
    gid: [u8; 16],
}

impl TrackId {
    #[must_use]
    pub fn from_gid(gid: [u8; 16]) -> Self {
        Self { gid }
    }

    /// Parse `spotify:track:<id>` or a bare 22-character base62 id.
    pub fn from_uri(uri: &str) -> NetResult<Self> {
        let id = uri.strip_prefix(TRACK_URI_PREFIX).unwrap_or(uri);
        Self::from_base62(id).map_err(|_| NetError::InvalidTrackId(uri.to_owned()))
    }

    pub fn from_base62(id: &str) -> NetResult<Self> {
        if id.len() != BASE62_LEN {
            return Err(NetError::InvalidTrackId(id.to_owned()));
        }
        let mut n: u128 = 0;
        for c in id.bytes() {
            let digit = BASE62
                .iter()
                .position(|&a| a == c)
                .ok_or_else(|| NetError::InvalidTrackId(id.to_owned()))?;
            n = n
                .checked_mul(62)
                .and_then(|n| n.checked_add(digit as u128))
                .ok_or_else(|| NetError::InvalidTrackId(id.to_owned()))?;
        }
        Ok(Self::from_gid(n.to_be_bytes()))
    }

    #[must_use]
    pub fn gid(&self) -> &[u8; 16] {
        &self.gid
    }

    /// 22-character base62 form, zero padded.
    #[must_use]
    pub fn to_base62(&self) -> String {
        let mut n = u128::from_be_bytes(self.gid);
        let mut out = [b'0'; BASE62_LEN];
        for slot in out.iter_mut().rev() {
            if n == 0 {
                break;
            }
            *slot = BASE62[usize::try_from(n % 62).unwrap_or_default()];
            n /= 62;
        }
        out.iter().map(|&b| char::from(b)).collect()
    }

    /// Lowercase hex of the gid, as used in metadata paths.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.gid)
    }

    #[must_use]
    pub fn to_uri(&self) -> String {
        format!("{TRACK_URI_PREFIX}{}", self.to_base62())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base62())
    }
}

/// 20-byte id of one encoded audio file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId([u8; 20]);

impl FileId {
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> NetResult<Self> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| NetError::malformed(format!("file id {s:?}: {e}")))?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.to_hex())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFile {
    pub file_id: FileId,
    pub format: AudioFormat,
}

/// Track metadata as returned by a [`TrackResolver`](crate::TrackResolver).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub name: String,
    pub artists: Vec<String>,
    pub files: Vec<AudioFile>,
    /// Alternative releases of the same recording, searched when the track
    /// itself lacks the wanted format.
    pub alternatives: Vec<TrackInfo>,
}

impl TrackInfo {
    /// First file in `format`: the track's own files, then its alternatives.
    #[must_use]
    pub fn choose_file(&self, format: AudioFormat) -> Option<&AudioFile> {
        self.files
            .iter()
            .chain(self.alternatives.iter().flat_map(|alt| alt.files.iter()))
            .find(|file| file.format == format)
    }

    #[must_use]
    pub fn first_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }
}
