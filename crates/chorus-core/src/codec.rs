//! Frame codec.
//!
//! Inbound frames carry a JSON object with a string `send` field; every other
//! field is ignored. Outbound frames are produced by the injected
//! [`Renderer`]. Messages crossing the broker travel as a JSON envelope
//! ([`to_wire`] / [`from_wire`]).

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{CodecError, RenderError};
use crate::message::Message;
use crate::render::Renderer;

/// One WebSocket frame, independent of the transport library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
    /// Close control frame.
    Close,
}

impl Frame {
    /// Frame kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close => "close",
        }
    }
}

/// Decoded inbound payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Inbound {
    /// Text to relay.
    pub send: String,
}

/// Decode a data frame into an [`Inbound`] payload.
///
/// Binary frames are accepted when they hold UTF-8 text.
pub fn decode(frame: &Frame) -> Result<Inbound, CodecError> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(data) => {
            let text = std::str::from_utf8(data).map_err(|_| CodecError::NotUtf8)?;
            decode_text(text)
        }
        other => Err(CodecError::UnsupportedFrame(other.kind())),
    }
}

/// Decode a text payload into an [`Inbound`] payload.
pub fn decode_text(text: &str) -> Result<Inbound, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(Inbound::deserialize(value)?)
}

/// Render `message` through `template` into an outbound text frame.
pub fn encode(
    renderer: &dyn Renderer,
    template: &str,
    message: &Message,
) -> Result<Frame, RenderError> {
    renderer.render(template, message).map(Frame::Text)
}

/// Serialize a message for publication on a broker topic.
pub fn to_wire(message: &Message) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Deserialize a message received from a broker topic.
pub fn from_wire(payload: &[u8]) -> Result<Message, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConnectionId;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    struct Upper;

    impl Renderer for Upper {
        fn render(&self, template: &str, message: &Message) -> Result<String, RenderError> {
            match template {
                "upper" => Ok(message.content().to_uppercase()),
                other => Err(RenderError::UnknownTemplate(other.to_owned())),
            }
        }
    }

    #[test]
    fn decodes_send_field() {
        let inbound = decode(&Frame::Text(r#"{"send":"hello"}"#.into())).unwrap();
        assert_eq!(inbound.send, "hello");
    }

    #[test]
    fn ignores_unknown_fields() {
        let text = r#"{"send":"hi","HEADERS":{"HX-Request":"true"},"extra":1}"#;
        let inbound = decode(&Frame::Text(text.into())).unwrap();
        assert_eq!(inbound.send, "hi");
    }

    #[test]
    fn empty_send_is_valid() {
        let inbound = decode_text(r#"{"send":""}"#).unwrap();
        assert!(inbound.send.is_empty());
    }

    #[test]
    fn missing_send_is_malformed() {
        let err = decode_text(r#"{"message":"hi"}"#).unwrap_err();
        assert_matches!(err, CodecError::MalformedPayload(_));
    }

    #[test]
    fn non_string_send_is_malformed() {
        assert_matches!(
            decode_text(r#"{"send":42}"#),
            Err(CodecError::MalformedPayload(_))
        );
        assert_matches!(
            decode_text(r#"{"send":null}"#),
            Err(CodecError::MalformedPayload(_))
        );
    }

    #[test]
    fn non_object_is_malformed() {
        assert_matches!(decode_text(r#"["hi"]"#), Err(CodecError::NotAnObject));
        assert_matches!(decode_text(r#""hi""#), Err(CodecError::NotAnObject));
        assert_matches!(decode_text("null"), Err(CodecError::NotAnObject));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert_matches!(decode_text("not json"), Err(CodecError::MalformedPayload(_)));
    }

    #[test]
    fn binary_utf8_decodes() {
        let frame = Frame::Binary(Bytes::from_static(br#"{"send":"bin"}"#));
        assert_eq!(decode(&frame).unwrap().send, "bin");
    }

    #[test]
    fn binary_non_utf8_is_malformed() {
        let frame = Frame::Binary(Bytes::from_static(&[0xff, 0xfe, 0x00]));
        assert_matches!(decode(&frame), Err(CodecError::NotUtf8));
    }

    #[test]
    fn control_frames_are_not_messages() {
        assert_matches!(
            decode(&Frame::Ping(Bytes::new())),
            Err(CodecError::UnsupportedFrame("ping"))
        );
        assert_matches!(decode(&Frame::Close), Err(CodecError::UnsupportedFrame("close")));
    }

    #[test]
    fn encode_renders_text_frame() {
        let msg = Message::new(ConnectionId::from("conn_a"), "shout");
        let frame = encode(&Upper, "upper", &msg).unwrap();
        assert_eq!(frame, Frame::Text("SHOUT".into()));
    }

    #[test]
    fn encode_unknown_template_fails() {
        let msg = Message::new(ConnectionId::from("conn_a"), "x");
        assert_matches!(
            encode(&Upper, "missing", &msg),
            Err(RenderError::UnknownTemplate(name)) if name == "missing"
        );
    }

    #[test]
    fn wire_envelope_preserves_message() {
        let msg = Message::new(ConnectionId::from("conn_a"), "over the bus");
        let payload = to_wire(&msg).unwrap();
        let back = from_wire(&payload).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn malformed_wire_envelope_is_rejected() {
        assert_matches!(from_wire(b"{}"), Err(CodecError::MalformedPayload(_)));
    }

    proptest! {
        #[test]
        fn any_string_send_decodes(content in ".*") {
            let text = serde_json::json!({ "send": content.clone() }).to_string();
            let inbound = decode_text(&text).unwrap();
            prop_assert_eq!(inbound.send, content);
        }

        #[test]
        fn arbitrary_text_never_panics(text in ".*") {
            let _ = decode_text(&text);
        }
    }
}
