use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::error::{Result, TransportError};

/// Message header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "CM" (0x43 0x4D).
pub const MAGIC: [u8; 2] = [0x43, 0x4D];

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Configuration for message delimiting over byte streams.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Maximum message size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

/// Delimit one message for a byte stream.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────────┐
/// │ Magic (2B)   │ Length    │ Message           │
/// │ 0x43 0x4D    │ (4B LE)   │ (Length bytes)    │
/// └──────────────┴───────────┴──────────────────┘
/// ```
pub fn encode_message(message: &[u8], dst: &mut BytesMut) -> Result<()> {
    if message.len() > u32::MAX as usize {
        return Err(TransportError::MessageTooLarge {
            size: message.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + message.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(message.len() as u32);
    dst.put_slice(message);
    Ok(())
}

/// Take one complete message off the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete message yet.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if len > max_message {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: max_message,
        });
    }

    if src.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_single() {
        let mut buf = BytesMut::new();
        encode_message(b"5:::{\"name\":\"chat\"}", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 19);

        let msg = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(msg.as_ref(), b"5:::{\"name\":\"chat\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_waits() {
        let mut buf = BytesMut::from(&[0x43, 0x4D, 0x01][..]);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn incomplete_body_waits() {
        let mut buf = BytesMut::new();
        encode_message(b"2::", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 1);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_message(&mut buf, DEFAULT_MAX_MESSAGE),
            Err(TransportError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024);
        assert!(matches!(
            decode_message(&mut buf, 16),
            Err(TransportError::MessageTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn back_to_back_messages() {
        let mut buf = BytesMut::new();
        encode_message(b"1::", &mut buf).unwrap();
        encode_message(b"", &mut buf).unwrap();
        encode_message(b"1::/chat", &mut buf).unwrap();

        let first = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        let empty = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        let third = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"1::");
        assert!(empty.is_empty());
        assert_eq!(third.as_ref(), b"1::/chat");
        assert!(buf.is_empty());
    }
}
