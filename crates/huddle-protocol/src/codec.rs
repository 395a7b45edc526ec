//! Codecs for Huddle events.
//!
//! Two encodings carry the same events:
//!
//! - **Text**: one JSON object per WebSocket text frame,
//!   `{"event": "...", "data": ...}`.
//! - **Packed**: MessagePack with a 4-byte big-endian length prefix, for
//!   binary frames. Several packed events may share one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum packed event size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding used by a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Text,
    /// Length-prefixed MessagePack binary frames.
    Packed,
}

/// Encode an event as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode an event from JSON text.
///
/// # Errors
///
/// Returns an error if the text is not a known event with a valid payload.
pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an event as a length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_packed<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_packed_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_packed_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single packed event from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_packed<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a packed event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete event was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the event is too large or invalid.
pub fn decode_packed_from<T: DeserializeOwned>(
    buf: &mut BytesMut,
) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);

    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, RoomRef, SendMessageRequest, ServerEvent};

    #[test]
    fn test_text_roundtrip() {
        let event = ClientEvent::SendMessage(SendMessageRequest::text("r1", "hello"));
        let text = encode_text(&event).unwrap();
        assert!(text.contains("\"event\":\"send_message\""));
        assert!(text.contains("\"roomId\":\"r1\""));

        let decoded: ClientEvent = decode_text(&text).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_text_rejects_bad_payload() {
        let result: Result<ClientEvent, _> =
            decode_text(r#"{"event":"request_access","data":{"room":"r1"}}"#);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_packed_roundtrip() {
        let event = ServerEvent::RoomDeleted(RoomRef {
            room_id: "r1".into(),
        });
        let encoded = encode_packed(&event).unwrap();
        let decoded: ServerEvent = decode_packed(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode_packed(&ClientEvent::GetRooms).unwrap();

        let partial = &encoded[..3];
        match decode_packed::<ClientEvent>(partial) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 8]);

        assert!(matches!(
            decode_packed_from::<ClientEvent>(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::JoinRoom("r1".into());
        let second = ClientEvent::TypingStart("r1".into());

        let mut buf = BytesMut::new();
        encode_packed_into(&first, &mut buf).unwrap();
        encode_packed_into(&second, &mut buf).unwrap();

        // Split the second frame across two reads.
        let tail = buf.split_off(buf.len() - 3);

        assert_eq!(decode_packed_from::<ClientEvent>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_packed_from::<ClientEvent>(&mut buf).unwrap(), None);

        buf.unsplit(tail);
        assert_eq!(decode_packed_from::<ClientEvent>(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }
}
