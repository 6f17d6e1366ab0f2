use barbiton_stream::FetchError;
use thiserror::Error;

use crate::AudioFormat;

/// Centralized error type for barbiton-net
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("Timeout")]
    Timeout,
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unknown channel {0}")]
    UnknownChannel(u16),
    #[error("unknown key sequence {0}")]
    UnknownSequence(u32),
    #[error("audio key rejected (seq {seq})")]
    KeyRejected { seq: u32 },
    #[error("all chunk channels are in use")]
    ChannelsExhausted,
    #[error("invalid track id: {0}")]
    InvalidTrackId(String),
    #[error("track metadata unavailable: {0}")]
    Resolve(String),
    #[error("no file found for format {0}")]
    NoMatchingFile(AudioFormat),
    #[error("request dropped by the router")]
    Closed,
}

impl NetError {
    /// Creates a transport error from a generic string
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a malformed-packet error from a generic string
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::Malformed(msg.into())
    }

    /// Checks if this error indicates a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }
}

impl From<NetError> for FetchError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Malformed(msg) => FetchError::Malformed(msg),
            NetError::Closed => FetchError::Abandoned,
            other => FetchError::Transport(other.to_string()),
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::unknown_channel(NetError::UnknownChannel(7), "unknown channel 7")]
    #[case::key(NetError::KeyRejected { seq: 3 }, "audio key rejected (seq 3)")]
    #[case::format(
        NetError::NoMatchingFile(AudioFormat::OggVorbis320),
        "no file found for format OGG_VORBIS_320"
    )]
    #[case::timeout(NetError::Timeout, "Timeout")]
    fn test_error_display(#[case] error: NetError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::malformed(NetError::malformed("short"), FetchError::Malformed("short".into()))]
    #[case::closed(NetError::Closed, FetchError::Abandoned)]
    #[case::timeout(NetError::Timeout, FetchError::Transport("Timeout".into()))]
    #[case::transport(
        NetError::transport("reset"),
        FetchError::Transport("transport error: reset".into())
    )]
    fn test_fetch_error_mapping(#[case] error: NetError, #[case] expected: FetchError) {
        assert_eq!(FetchError::from(error), expected);
    }

    #[test]
    fn test_is_timeout() {
        assert!(NetError::Timeout.is_timeout());
        assert!(!NetError::Closed.is_timeout());
    }
}
