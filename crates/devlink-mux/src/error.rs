/// Errors that can occur in stream-multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Event-channel error (includes sending on a destroyed connection).
    #[error("channel error: {0}")]
    Channel(#[from] devlink_channel::ChannelError),

    /// The stream was destroyed by a peer error or transport loss.
    #[error("stream aborted: {0}")]
    StreamAborted(String),

    /// The peer acknowledged a write with an error.
    #[error("write rejected by peer: {0}")]
    WriteFailed(String),

    /// The stream is finished or torn down; no further writes are accepted.
    #[error("stream closed")]
    StreamClosed,

    /// A stream control message could not be interpreted.
    #[error("malformed stream control: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, MuxError>;
