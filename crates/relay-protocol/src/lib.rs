//! Wire types and binary framing codec for the relay stream protocol.
//!
//! Messages are discrete, tagged, length-prefixed binary units delivered
//! atomically by the transport (one WebSocket binary frame per message, not
//! a raw byte stream). All multi-byte fields are big-endian. This crate has
//! no I/O and no state: `encode_data` and `decode` are pure functions over
//! byte buffers.

use bytes::Buf;
use std::io::Cursor;

// ---------------------------------------------------------------------------
// Wire tags
// ---------------------------------------------------------------------------

/// Never a valid tag on the wire.
pub const TAG_UNUSED: u16 = 0;
/// server→client: 4-byte length L, L bytes of session id.
pub const TAG_CONNECT_SUCCESS_SID: u16 = 1;
/// server→client: 8-byte cumulative bytes received by server.
pub const TAG_RECONNECT_SUCCESS_ACK: u16 = 2;
/// Reserved, must never appear on the wire.
pub const TAG_DEPRECATED: u16 = 3;
/// bi-directional: 4-byte length L, L bytes of payload.
pub const TAG_DATA: u16 = 4;
/// Reserved, ignored if parsed, not expected.
pub const TAG_ACK_LATENCY: u16 = 5;
/// Reserved, ignored if parsed, not expected.
pub const TAG_REPLY_LATENCY: u16 = 6;
/// server→client: 8-byte cumulative bytes received by server.
pub const TAG_ACK: u16 = 7;

/// Maximum payload size accepted in a single `DATA` frame (16 KiB).
///
/// The wire format does not enumerate a maximum; this is a conservative
/// bound chosen for this implementation.
pub const MAX_DATA_PAYLOAD_SIZE: usize = 16 * 1024;

/// The minimum caller read buffer size: frame header (2-byte tag + 4-byte
/// length) plus the largest possible `DATA` payload. Derived, never
/// hand-maintained, so it can't drift from `MAX_DATA_PAYLOAD_SIZE`.
pub const MIN_READ_SIZE: usize = 2 + 4 + MAX_DATA_PAYLOAD_SIZE;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// New session established; carries the opaque session id.
    ConnectSuccessSid(Vec<u8>),
    /// Resume succeeded; carries the server's cumulative received-byte count.
    ReconnectSuccessAck(u64),
    /// Stream payload bytes.
    Data(Vec<u8>),
    /// Cumulative received-byte acknowledgement.
    Ack(u64),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds the {max}-byte maximum")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("invalid or forbidden tag {0}")]
    InvalidTag(u16),
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a `DATA` frame: `tag(2) | length(4) | payload`.
pub fn encode_data(payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_DATA_PAYLOAD_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_DATA_PAYLOAD_SIZE,
        });
    }
    let mut out = Vec::with_capacity(2 + 4 + payload.len());
    out.extend_from_slice(&TAG_DATA.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a single received message buffer into a [`Message`].
///
/// Any tag outside the recognized set, or one of the reserved tags
/// (`UNUSED`, `DEPRECATED`, `ACK_LATENCY`, `REPLY_LATENCY`), yields
/// [`DecodeError::InvalidTag`]. Whether that is fatal for the stream or
/// silently dropped is a decision made by the caller (the relay stream's
/// read loop), not by this codec.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut cur = Cursor::new(buf);
    let tag = get_u16(&mut cur)?;
    match tag {
        TAG_CONNECT_SUCCESS_SID => {
            let len = get_u32(&mut cur)? as usize;
            let sid = get_bytes(&mut cur, len)?;
            Ok(Message::ConnectSuccessSid(sid))
        }
        TAG_RECONNECT_SUCCESS_ACK => {
            let acked = get_u64(&mut cur)?;
            Ok(Message::ReconnectSuccessAck(acked))
        }
        TAG_DATA => {
            let len = get_u32(&mut cur)? as usize;
            let payload = get_bytes(&mut cur, len)?;
            Ok(Message::Data(payload))
        }
        TAG_ACK => {
            let acked = get_u64(&mut cur)?;
            Ok(Message::Ack(acked))
        }
        other => Err(DecodeError::InvalidTag(other)),
    }
}

fn need(cur: &Cursor<&[u8]>, n: usize) -> Result<(), DecodeError> {
    if cur.remaining() < n {
        return Err(DecodeError::Truncated {
            need: n,
            have: cur.remaining(),
        });
    }
    Ok(())
}

fn get_u16(cur: &mut Cursor<&[u8]>) -> Result<u16, DecodeError> {
    need(cur, 2)?;
    Ok(cur.get_u16())
}

fn get_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, DecodeError> {
    need(cur, 4)?;
    Ok(cur.get_u32())
}

fn get_u64(cur: &mut Cursor<&[u8]>) -> Result<u64, DecodeError> {
    need(cur, 8)?;
    Ok(cur.get_u64())
}

fn get_bytes(cur: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, DecodeError> {
    need(cur, len)?;
    let mut buf = vec![0u8; len];
    cur.copy_to_slice(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_data_payload() {
        let payload = b"hello relay";
        let encoded = encode_data(payload).unwrap();
        assert_eq!(encoded.len(), 2 + 4 + payload.len());
        match decode(&encoded).unwrap() {
            Message::Data(bytes) => assert_eq!(bytes, payload),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_empty_data_payload() {
        let encoded = encode_data(b"").unwrap();
        match decode(&encoded).unwrap() {
            Message::Data(bytes) => assert!(bytes.is_empty()),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; MAX_DATA_PAYLOAD_SIZE + 1];
        let err = encode_data(&payload).unwrap_err();
        assert_eq!(
            err,
            EncodeError::PayloadTooLarge {
                len: MAX_DATA_PAYLOAD_SIZE + 1,
                max: MAX_DATA_PAYLOAD_SIZE,
            }
        );
    }

    #[test]
    fn decodes_concatenated_stream_of_n_messages_independently() {
        let messages: Vec<Vec<u8>> = (0..5u8)
            .map(|i| encode_data(&vec![i; i as usize + 1]).unwrap())
            .collect();
        for (i, m) in messages.iter().enumerate() {
            match decode(m).unwrap() {
                Message::Data(bytes) => assert_eq!(bytes, vec![i as u8; i + 1]),
                other => panic!("expected Data, got {other:?}"),
            }
        }
    }

    #[test]
    fn decodes_connect_success_sid() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TAG_CONNECT_SUCCESS_SID.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"sid0");
        assert_eq!(
            decode(&buf).unwrap(),
            Message::ConnectSuccessSid(b"sid0".to_vec())
        );
    }

    #[test]
    fn decodes_reconnect_success_ack() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TAG_RECONNECT_SUCCESS_ACK.to_be_bytes());
        buf.extend_from_slice(&42u64.to_be_bytes());
        assert_eq!(decode(&buf).unwrap(), Message::ReconnectSuccessAck(42));
    }

    #[test]
    fn decodes_ack() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TAG_ACK.to_be_bytes());
        buf.extend_from_slice(&100u64.to_be_bytes());
        assert_eq!(decode(&buf).unwrap(), Message::Ack(100));
    }

    #[test]
    fn truncated_single_byte_frame_is_an_error() {
        let err = decode(&[0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn truncated_data_length_field_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TAG_DATA.to_be_bytes());
        buf.extend_from_slice(&[0x00, 0x00]); // only 2 of 4 length bytes
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn truncated_data_payload_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TAG_DATA.to_be_bytes());
        buf.extend_from_slice(&10u32.to_be_bytes()); // claims 10 bytes
        buf.extend_from_slice(b"short"); // only 5 supplied
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn reserved_and_unknown_tags_are_invalid() {
        for tag in [
            TAG_UNUSED,
            TAG_DEPRECATED,
            TAG_ACK_LATENCY,
            TAG_REPLY_LATENCY,
            TAG_ACK + 1,
        ] {
            let buf = tag.to_be_bytes();
            let err = decode(&buf).unwrap_err();
            assert_eq!(err, DecodeError::InvalidTag(tag));
        }
    }
}
