/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The message is shorter than the fixed header (name field + kind byte).
    #[error("malformed frame ({len} bytes, minimum {min})")]
    MalformedFrame { len: usize, min: usize },

    /// The payload-kind byte is not a known kind.
    #[error("unknown payload kind byte {0:#04x}")]
    UnknownPayloadKind(u8),

    /// The event name is empty, contains NUL bytes, or is not valid UTF-8.
    #[error("invalid event name: {0}")]
    InvalidEventName(String),

    /// The event name does not fit the fixed-width field.
    #[error("event name too long ({len} bytes, max {max})")]
    EventNameTooLong { len: usize, max: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
