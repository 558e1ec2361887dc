use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Width of the fixed event-name field in bytes.
///
/// Protocol constant agreed by both ends out of band; shorter names are
/// zero-padded on the wire.
pub const EVENT_NAME_WIDTH: usize = 10;

/// Minimum message size: name field + kind byte.
pub const MESSAGE_HEADER_SIZE: usize = EVENT_NAME_WIDTH + 1;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// How the receiver should treat the payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Raw bytes, delivered untouched.
    Binary,
    /// UTF-8 text the receiver attempts to parse as JSON, falling back to the
    /// raw text on parse failure.
    Encoded,
}

impl PayloadKind {
    /// Parse the wire control byte.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PayloadKind::Binary),
            1 => Ok(PayloadKind::Encoded),
            other => Err(FrameError::UnknownPayloadKind(other)),
        }
    }

    /// The wire control byte for this kind.
    pub fn as_wire(self) -> u8 {
        match self {
            PayloadKind::Binary => 0,
            PayloadKind::Encoded => 1,
        }
    }
}

/// A validated event name that fits the fixed-width field.
///
/// Names are non-empty UTF-8 of at most [`EVENT_NAME_WIDTH`] bytes with no
/// NUL bytes (NUL is the wire padding and cannot appear inside a name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName(String);

impl EventName {
    /// Validate and wrap an event name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.bytes().any(|b| b == 0) {
            return Err(FrameError::InvalidEventName(name));
        }
        if name.len() > EVENT_NAME_WIDTH {
            return Err(FrameError::EventNameTooLong {
                len: name.len(),
                max: EVENT_NAME_WIDTH,
            });
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EventName {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl PartialEq<str> for EventName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EventName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One framed message: event name + payload kind + payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The event this message is addressed to.
    pub event: EventName,
    /// How the payload bytes should be interpreted.
    pub kind: PayloadKind,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a binary-passthrough frame.
    pub fn binary(event: EventName, payload: impl Into<Bytes>) -> Self {
        Self {
            event,
            kind: PayloadKind::Binary,
            payload: payload.into(),
        }
    }

    /// Create an encoded (JSON text) frame.
    pub fn encoded(event: EventName, payload: impl Into<Bytes>) -> Self {
        Self {
            event,
            kind: PayloadKind::Encoded,
            payload: payload.into(),
        }
    }

    /// The message size of this frame (header + payload), excluding the
    /// outer length prefix.
    pub fn message_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }
}

/// Encode a message into `dst`.
///
/// The name field is zero-initialized before the name bytes are copied in, so
/// unused trailing bytes are always `0x00` on the wire.
pub fn encode_message(frame: &Frame, dst: &mut BytesMut) {
    let mut field = [0u8; EVENT_NAME_WIDTH];
    let name = frame.event.as_str().as_bytes();
    field[..name.len()].copy_from_slice(name);

    dst.reserve(frame.message_size());
    dst.put_slice(&field);
    dst.put_u8(frame.kind.as_wire());
    dst.put_slice(&frame.payload);
}

/// Decode one complete message.
///
/// Trailing zero bytes of the name field are padding and are stripped; they
/// never leak into the recovered name.
pub fn decode_message(src: &[u8]) -> Result<Frame> {
    if src.len() < MESSAGE_HEADER_SIZE {
        return Err(FrameError::MalformedFrame {
            len: src.len(),
            min: MESSAGE_HEADER_SIZE,
        });
    }

    let field = &src[..EVENT_NAME_WIDTH];
    let name_len = field
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    let name = std::str::from_utf8(&field[..name_len])
        .map_err(|_| FrameError::InvalidEventName(format!("{:?}", &field[..name_len])))?;
    let event = EventName::new(name)?;

    let kind = PayloadKind::from_wire(src[EVENT_NAME_WIDTH])?;
    let payload = Bytes::copy_from_slice(&src[MESSAGE_HEADER_SIZE..]);

    Ok(Frame {
        event,
        kind,
        payload,
    })
}

/// Configuration for the wire codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
