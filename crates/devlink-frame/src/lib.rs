//! Event-message framing for devlink connections.
//!
//! Every message carries a fixed-width event name, a payload-kind byte and the
//! payload itself:
//!
//! ```text
//! ┌───────────────────────┬──────────┬──────────────────┐
//! │ Event name (10B,      │ Kind     │ Payload          │
//! │ zero-padded)          │ (1B)     │ (remaining)      │
//! └───────────────────────┴──────────┴──────────────────┘
//! ```
//!
//! On a byte stream the message travels inside a length-prefixed envelope
//! handled by [`WireCodec`]. No partial reads, no buffer management in user
//! code.

pub mod codec;
pub mod error;
pub mod wire;

pub use codec::{
    decode_message, encode_message, EventName, Frame, FrameConfig, PayloadKind,
    DEFAULT_MAX_PAYLOAD, EVENT_NAME_WIDTH, MESSAGE_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use wire::{WireCodec, LEN_PREFIX_SIZE};
