use bytes::Bytes;
use devlink_frame::PayloadKind;

use crate::connection::CORRELATION_FIELD;

/// A decoded event payload as delivered to handlers.
///
/// `Encoded` frames are parsed as JSON; unparseable UTF-8 text is delivered
/// as [`EventPayload::Text`] rather than raised as an error, and non-UTF-8
/// bytes under the `Encoded` kind fall back to [`EventPayload::Binary`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Binary passthrough payload.
    Binary(Bytes),
    /// Encoded payload that parsed as JSON.
    Json(serde_json::Value),
    /// Encoded payload that was valid UTF-8 but not valid JSON.
    Text(String),
}

impl EventPayload {
    /// Decode a frame payload according to its kind byte.
    pub fn decode(kind: PayloadKind, payload: Bytes) -> Self {
        match kind {
            PayloadKind::Binary => EventPayload::Binary(payload),
            PayloadKind::Encoded => match std::str::from_utf8(&payload) {
                Ok(text) => match serde_json::from_str(text) {
                    Ok(value) => EventPayload::Json(value),
                    Err(_) => EventPayload::Text(text.to_owned()),
                },
                Err(_) => EventPayload::Binary(payload),
            },
        }
    }

    /// The payload as JSON, if it decoded as such.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            EventPayload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The payload as raw bytes, if it was a binary frame.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            EventPayload::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The correlation token of a JSON object payload, if present.
    pub fn correlation_token(&self) -> Option<&str> {
        self.as_json()?.get(CORRELATION_FIELD)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_kind_is_passthrough() {
        let payload = EventPayload::decode(PayloadKind::Binary, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(payload, EventPayload::Binary(Bytes::from_static(b"{\"a\":1}")));
    }

    #[test]
    fn encoded_kind_parses_json() {
        let payload = EventPayload::decode(PayloadKind::Encoded, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(payload.as_json().unwrap()["a"], 1);
    }

    #[test]
    fn encoded_kind_falls_back_to_text() {
        let payload = EventPayload::decode(PayloadKind::Encoded, Bytes::from_static(b"not json"));
        assert_eq!(payload, EventPayload::Text("not json".to_owned()));
    }

    #[test]
    fn encoded_kind_falls_back_to_binary_on_invalid_utf8() {
        let payload = EventPayload::decode(PayloadKind::Encoded, Bytes::from_static(&[0xFF, 0xFE]));
        assert!(matches!(payload, EventPayload::Binary(_)));
    }

    #[test]
    fn correlation_token_requires_json_object() {
        let with = EventPayload::decode(
            PayloadKind::Encoded,
            Bytes::from_static(b"{\"token\":\"t-1\",\"cmd\":\"login\"}"),
        );
        assert_eq!(with.correlation_token(), Some("t-1"));

        let without =
            EventPayload::decode(PayloadKind::Encoded, Bytes::from_static(b"{\"cmd\":\"x\"}"));
        assert_eq!(without.correlation_token(), None);

        let text = EventPayload::decode(PayloadKind::Encoded, Bytes::from_static(b"token"));
        assert_eq!(text.correlation_token(), None);
    }
}
