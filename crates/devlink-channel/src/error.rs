/// Errors that can occur in event-channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] devlink_frame::FrameError),

    /// The connection behind this channel has been destroyed.
    #[error("channel closed")]
    Closed,

    /// A correlated request did not receive its reply in time.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
