//! Flow-controlled duplex byte streams over one devlink event channel.
//!
//! The multiplexer carries any number of independent streams on a single
//! connection — control messages ride the channel's `stream` event while
//! chunk data is paced by explicit acknowledgements: at most one write is in
//! flight per stream at any time, so a slow peer never forces unbounded
//! buffering on the wire.
//!
//! This is the path a large payload (e.g. a project archive being uploaded)
//! takes, while small control messages use the event channel directly.

pub mod control;
pub mod error;
pub mod mux;
pub mod state;
pub mod stream;

pub use control::{decode_chunk, encode_chunk, stream_event, ChunkEncoding, StreamControl, STREAM_EVENT};
pub use error::{MuxError, Result};
pub use mux::StreamMux;
pub use stream::MuxStream;
