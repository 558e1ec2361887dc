use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::codec::{
    decode_message, encode_message, Frame, FrameConfig, MESSAGE_HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Size of the outer length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Length-prefixed envelope codec for carrying messages over a byte stream.
///
/// Wire format: `[len: u32 LE][message]` where `message` is the
/// [`crate::codec`] format (name field + kind byte + payload). The length
/// prefix exists because a byte stream does not preserve write boundaries;
/// the message format inside the envelope is unchanged.
#[derive(Debug, Default)]
pub struct WireCodec {
    config: FrameConfig,
}

impl WireCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < LEN_PREFIX_SIZE {
            return Ok(None); // Need more data
        }

        let msg_len = u32::from_le_bytes(src[..LEN_PREFIX_SIZE].try_into().unwrap()) as usize;

        // Header-level sanity checks run before the body arrives so a bad
        // peer fails fast instead of filling the buffer.
        if msg_len < MESSAGE_HEADER_SIZE {
            return Err(FrameError::MalformedFrame {
                len: msg_len,
                min: MESSAGE_HEADER_SIZE,
            });
        }
        let payload_len = msg_len - MESSAGE_HEADER_SIZE;
        if payload_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.config.max_payload_size,
            });
        }

        if src.len() < LEN_PREFIX_SIZE + msg_len {
            src.reserve(LEN_PREFIX_SIZE + msg_len - src.len());
            return Ok(None); // Need more data
        }

        src.advance(LEN_PREFIX_SIZE);
        let message = src.split_to(msg_len);
        let frame = decode_message(&message)?;
        trace!(event = %frame.event, len = frame.payload.len(), "decoded frame");
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let msg_len = frame.message_size();
        dst.reserve(LEN_PREFIX_SIZE + msg_len);
        dst.put_u32_le(msg_len as u32);
        encode_message(&frame, dst);
        Ok(())
    }
}
