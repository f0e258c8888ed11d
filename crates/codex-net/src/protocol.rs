//! Frame encoding shared by both transports
//!
//! Frames are serialized as JSON. The byte-stream transport prefixes each
//! encoded frame with a 4-byte little-endian length; the remote-object
//! transport carries messages as JSON-RPC params instead.

use codex_core::{CodexError, Frame, Result};

/// Largest frame body accepted on the byte stream (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Serialize a frame to JSON bytes
pub fn serialize(frame: &Frame) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodexError::ProtocolError(format!(
            "Frame too large: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Deserialize a frame from JSON bytes
pub fn deserialize(bytes: &[u8]) -> Result<Frame> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_core::{Message, MessageKind, Position};

    #[test]
    fn test_heartbeat_format() {
        let bytes = serialize(&Frame::Heartbeat).unwrap();
        assert_eq!(bytes, br#""Heartbeat""#);
        assert_eq!(deserialize(&bytes).unwrap(), Frame::Heartbeat);
    }

    #[test]
    fn test_message_from_peer() {
        // Exact JSON a peer puts on the wire for a placement
        let json = r#"{"Message":{"Kind":"PlaceCard","Payload":{"Three":[{"Int":2},{"Position":{"x":1,"y":0}},{"Flag":false}]}}}"#;
        match deserialize(json.as_bytes()).unwrap() {
            Frame::Message(msg) => {
                assert_eq!(msg.kind, MessageKind::PlaceCard);
                assert_eq!(msg.int(0).unwrap(), 2);
                assert_eq!(msg.position(1).unwrap(), Position::new(1, 0));
                assert!(!msg.flag(2).unwrap());
            }
            other => panic!("Wrong frame type: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let text = "x".repeat(MAX_FRAME_LEN);
        let frame = Frame::Message(Message::unary(MessageKind::Chat, text));
        assert!(matches!(
            serialize(&frame),
            Err(CodexError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        assert!(matches!(
            deserialize(b"{not json"),
            Err(CodexError::SerializationError(_))
        ));
    }
}
