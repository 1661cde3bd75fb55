use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: little-endian body length.
pub const HEADER_SIZE: usize = 4;

/// Fixed body prefix: code (4) + name length (1).
const BODY_PREFIX: usize = 5;

/// Longest name the 1-byte name length can describe.
const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Default maximum message size: 10 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default per-connection read buffer: 200 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 200 * 1024;

/// A relay packet: numeric code, diagnostic name and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind, looked up in the [`PacketCatalog`](crate::PacketCatalog).
    pub code: u32,
    /// Human-readable label carried for diagnostics.
    pub name: String,
    /// Opaque payload; may be empty.
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(code: u32, name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Length of the body as written into the header.
    pub fn body_len(&self) -> usize {
        BODY_PREFIX + self.name.len() + self.payload.len()
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬───────────┬────────────┬───────────┐
/// │ Length     │ Code      │ Name len  │ Name       │ Payload   │
/// │ (4B LE)    │ (4B LE)   │ (1B)      │ (UTF-8)    │ (rest)    │
/// └────────────┴───────────┴───────────┴────────────┴───────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let name = packet.name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(FrameError::NameTooLong { len: name.len() });
    }
    let body_len = packet.body_len();
    if body_len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body_len);
    dst.put_u32_le(body_len as u32);
    dst.put_u32_le(packet.code);
    dst.put_u8(name.len() as u8);
    dst.put_slice(name);
    dst.put_slice(&packet.payload);
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_message_size: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let body_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if body_len > max_message_size {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_message_size,
        });
    }
    if body_len < BODY_PREFIX {
        return Err(FrameError::Malformed(format!(
            "body length {body_len} shorter than {BODY_PREFIX}-byte prefix"
        )));
    }

    if src.len() < HEADER_SIZE + body_len {
        src.reserve(HEADER_SIZE + body_len - src.len());
        return Ok(None);
    }

    // Validate the name before consuming anything so a bad packet leaves the
    // buffer untouched for diagnostics.
    let name_len = src[HEADER_SIZE + 4] as usize;
    if BODY_PREFIX + name_len > body_len {
        return Err(FrameError::Malformed(format!(
            "name length {name_len} overruns body length {body_len}"
        )));
    }
    let name_start = HEADER_SIZE + BODY_PREFIX;
    let name = std::str::from_utf8(&src[name_start..name_start + name_len])?.to_string();

    src.advance(HEADER_SIZE);
    let mut body = src.split_to(body_len);
    let code = body.get_u32_le();
    body.advance(1 + name_len);

    Ok(Some(Packet {
        code,
        name,
        payload: body.freeze(),
    }))
}

/// Configuration for packet readers and writers.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum packet body size in bytes. Default: 10 MiB.
    pub max_message_size: usize,
    /// Read chunk size and initial buffer capacity. Default: 200 KiB.
    pub buffer_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_get_detected_frame() {
        let mut buf = BytesMut::new();
        let packet = Packet::new(1113, "GetDetectedFrame", Bytes::new());

        encode_packet(&packet, &mut buf).unwrap();
        assert_eq!(buf.len(), packet.wire_size());
        assert_eq!(buf.len(), HEADER_SIZE + 5 + "GetDetectedFrame".len());

        let decoded = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn wire_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(1114, "ab", &b"xyz"[..]), &mut buf).unwrap();

        assert_eq!(&buf[0..4], &10u32.to_le_bytes());
        assert_eq!(&buf[4..8], &1114u32.to_le_bytes());
        assert_eq!(buf[8], 2);
        assert_eq!(&buf[9..11], b"ab");
        assert_eq!(&buf[11..], b"xyz");
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x09, 0x00, 0x00][..]);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(1114, "SetDetectedFrame", &b"pixels"[..]), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 7);

        assert!(decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(64);
        let result = decode_packet(&mut buf, 32);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn decode_body_shorter_than_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_slice(&[0, 0]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn decode_name_overrun() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(6);
        buf.put_u32_le(1111);
        buf.put_u8(9);
        buf.put_u8(b'x');
        let result = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn decode_invalid_utf8_name() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(7);
        buf.put_u32_le(1111);
        buf.put_u8(2);
        buf.put_slice(&[0xFF, 0xFE]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidName(_))));
    }

    #[test]
    fn encode_rejects_long_name() {
        let mut buf = BytesMut::new();
        let packet = Packet::new(1, "n".repeat(256), Bytes::new());
        let result = encode_packet(&packet, &mut buf);
        assert!(matches!(result, Err(FrameError::NameTooLong { len: 256 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_packets_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(1114, "SetDetectedFrame", &b"f1"[..]), &mut buf).unwrap();
        encode_packet(&Packet::new(1115, "EndOfFrame", Bytes::new()), &mut buf).unwrap();

        let first = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        let second = decode_packet(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(first.code, 1114);
        assert_eq!(first.payload.as_ref(), b"f1");
        assert_eq!(second.code, 1115);
        assert!(second.payload.is_empty());
        assert!(buf.is_empty());
    }
}
