use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use devlink_channel::{EventChannel, EventPayload};
use devlink_frame::EventName;
use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

/// Event name carrying every stream control message.
pub const STREAM_EVENT: &str = "stream";

/// The [`STREAM_EVENT`] name as a validated [`EventName`].
pub fn stream_event() -> EventName {
    EventName::new(STREAM_EVENT).expect("constant event name is valid")
}

/// Transport encoding of a chunk inside the JSON control envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    Base64,
    Utf8,
}

/// Stream control messages.
///
/// One tagged union instead of per-operation listener strings: receivers
/// match on it exhaustively, so a new control kind cannot be silently
/// undispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StreamControl {
    /// Announce a new stream; the receiver creates the mirrored half.
    Connect { id: String },
    /// Pull request: the reader wants up to `size` more bytes.
    Read { id: String, size: u64 },
    /// One data chunk. Expects a `WriteAck` before the sender dispatches the
    /// next queued chunk.
    Write {
        id: String,
        chunk: String,
        encoding: ChunkEncoding,
    },
    /// Acknowledge a `Write`, successfully or with an error.
    WriteAck {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// End of stream: the sender will write no more data.
    End { id: String },
    /// Fatal stream error; the receiver destroys the mirrored half.
    Error { id: String, message: String },
}

impl StreamControl {
    /// The stream this control message addresses.
    pub fn stream_id(&self) -> &str {
        match self {
            StreamControl::Connect { id }
            | StreamControl::Read { id, .. }
            | StreamControl::Write { id, .. }
            | StreamControl::WriteAck { id, .. }
            | StreamControl::End { id }
            | StreamControl::Error { id, .. } => id,
        }
    }

    /// Parse a control message out of an event payload.
    pub fn from_payload(payload: &EventPayload) -> Result<Self> {
        let value = payload
            .as_json()
            .ok_or_else(|| MuxError::Protocol("stream control must be a JSON object".into()))?;
        serde_json::from_value(value.clone()).map_err(|err| MuxError::Protocol(err.to_string()))
    }
}

/// Encode a chunk for the JSON envelope.
pub fn encode_chunk(chunk: &[u8]) -> (String, ChunkEncoding) {
    (BASE64.encode(chunk), ChunkEncoding::Base64)
}

/// Decode a received chunk.
pub fn decode_chunk(chunk: &str, encoding: ChunkEncoding) -> Result<Bytes> {
    match encoding {
        ChunkEncoding::Base64 => BASE64
            .decode(chunk)
            .map(Bytes::from)
            .map_err(|err| MuxError::Protocol(format!("bad base64 chunk: {err}"))),
        ChunkEncoding::Utf8 => Ok(Bytes::copy_from_slice(chunk.as_bytes())),
    }
}

/// Send one control message over the channel.
pub(crate) fn send_control(channel: &EventChannel, control: &StreamControl) -> Result<()> {
    let value = serde_json::to_value(control)
        .map_err(|err| MuxError::Protocol(err.to_string()))?;
    channel.send_json(stream_event(), &value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use devlink_frame::PayloadKind;

    use super::*;

    #[test]
    fn control_json_shape() {
        let control = StreamControl::Write {
            id: "s-1".into(),
            chunk: "YWJj".into(),
            encoding: ChunkEncoding::Base64,
        };
        let json = serde_json::to_value(&control).unwrap();
        assert_eq!(json["op"], "write");
        assert_eq!(json["id"], "s-1");
        assert_eq!(json["encoding"], "base64");
    }

    #[test]
    fn ack_error_field_is_optional() {
        let ok: StreamControl = serde_json::from_value(serde_json::json!({
            "op": "write_ack", "id": "s-1"
        }))
        .unwrap();
        assert_eq!(
            ok,
            StreamControl::WriteAck {
                id: "s-1".into(),
                error: None
            }
        );

        let failed: StreamControl = serde_json::from_value(serde_json::json!({
            "op": "write_ack", "id": "s-1", "error": "disk full"
        }))
        .unwrap();
        assert!(matches!(failed, StreamControl::WriteAck { error: Some(_), .. }));
    }

    #[test]
    fn chunk_roundtrip() {
        let (chunk, encoding) = encode_chunk(b"\x00\x01binary\xFF");
        let decoded = decode_chunk(&chunk, encoding).unwrap();
        assert_eq!(decoded.as_ref(), b"\x00\x01binary\xFF");
    }

    #[test]
    fn utf8_chunk_decodes_verbatim() {
        let decoded = decode_chunk("plain text", ChunkEncoding::Utf8).unwrap();
        assert_eq!(decoded.as_ref(), b"plain text");
    }

    #[test]
    fn bad_base64_is_a_protocol_error() {
        let err = decode_chunk("!!!", ChunkEncoding::Base64).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
    }

    #[test]
    fn from_payload_rejects_non_json() {
        let payload = EventPayload::decode(PayloadKind::Binary, Bytes::from_static(b"raw"));
        let err = StreamControl::from_payload(&payload).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
    }

    #[test]
    fn unknown_op_is_a_protocol_error() {
        let payload = EventPayload::decode(
            PayloadKind::Encoded,
            Bytes::from_static(br#"{"op":"warp","id":"s-1"}"#),
        );
        let err = StreamControl::from_payload(&payload).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
    }
}
