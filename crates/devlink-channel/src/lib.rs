//! Named-event dispatch over one devlink connection.
//!
//! A [`Connection`] owns exactly one byte stream and runs a single
//! event-processing task: frame decode, handler invocation and bookkeeping all
//! happen on that task, so no two handlers for the same connection ever run
//! concurrently. The cloneable [`EventChannel`] handle is the public surface:
//! register listeners, send frames, and correlate request/response pairs via
//! opaque tokens echoed by the responder.

pub mod connection;
pub mod error;
pub mod payload;

pub use connection::{
    ChannelConfig, Connection, EventChannel, EventHandler, HandlerCtx, HandlerId, OnceListener,
    CORRELATION_FIELD,
};
pub use error::{ChannelError, Result};
pub use payload::EventPayload;
