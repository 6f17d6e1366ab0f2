use std::{fmt, str::FromStr};

use crate::NetError;

/// Bytes of proprietary header preceding the Ogg stream in Vorbis files.
pub const OGG_HEADER_SIZE: u64 = 0xa7;

/// Encoded audio file variants a track may offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    OggVorbis96,
    #[default]
    OggVorbis160,
    OggVorbis320,
    Mp3_256,
    Mp3_320,
    Mp3_160,
    Mp3_96,
    Mp3_160Enc,
    Aac24,
    Aac48,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 10] = [
        Self::OggVorbis96,
        Self::OggVorbis160,
        Self::OggVorbis320,
        Self::Mp3_256,
        Self::Mp3_320,
        Self::Mp3_160,
        Self::Mp3_96,
        Self::Mp3_160Enc,
        Self::Aac24,
        Self::Aac48,
    ];

    /// File name suffix used in asset labels.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::OggVorbis96 => ".96.ogg",
            Self::OggVorbis160 => ".160.ogg",
            Self::OggVorbis320 => ".320.ogg",
            Self::Mp3_256 => ".256.mp3",
            Self::Mp3_320 => ".320.mp3",
            Self::Mp3_160 => ".160.mp3",
            Self::Mp3_96 => ".96.mp3",
            Self::Mp3_160Enc => ".160enc.mp3",
            Self::Aac24 => ".24.aac",
            Self::Aac48 => ".48.aac",
        }
    }

    /// MIME type, derived from the extension suffix.
    #[must_use]
    pub fn media_type(self) -> &'static str {
        let ext = self.extension();
        if ext.ends_with(".ogg") {
            "audio/ogg"
        } else if ext.ends_with(".mp3") {
            "audio/mpeg"
        } else {
            "audio/aac"
        }
    }

    /// Bytes to skip before the playable payload.
    #[must_use]
    pub fn header_offset(self) -> u64 {
        if self.extension().ends_with(".ogg") {
            OGG_HEADER_SIZE
        } else {
            0
        }
    }

    /// Wire name of the format.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OggVorbis96 => "OGG_VORBIS_96",
            Self::OggVorbis160 => "OGG_VORBIS_160",
            Self::OggVorbis320 => "OGG_VORBIS_320",
            Self::Mp3_256 => "MP3_256",
            Self::Mp3_320 => "MP3_320",
            Self::Mp3_160 => "MP3_160",
            Self::Mp3_96 => "MP3_96",
            Self::Mp3_160Enc => "MP3_160_ENC",
            Self::Aac24 => "AAC_24",
            Self::Aac48 => "AAC_48",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = NetError;

    /// Accepts the wire name (`OGG_VORBIS_160`) or the extension without the
    /// leading dot (`160.ogg`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.');
        Self::ALL
            .into_iter()
            .find(|f| {
                f.name().eq_ignore_ascii_case(wanted)
                    || f.extension()[1..].eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| NetError::malformed(format!("unknown audio format {s:?}")))
    }
}
