#![forbid(unsafe_code)]

/// Events emitted by the packet demultiplexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetEvent {
    /// A data channel was allocated for a chunk request.
    ChannelOpened { channel: u16, chunk: u32 },

    /// A data channel delivered its terminator and was released.
    ChannelCompleted { channel: u16, bytes: usize },

    /// An audio key arrived for a pending request.
    KeyReceived { seq: u32 },

    /// The server refused an audio key request.
    KeyRejected { seq: u32 },
}
