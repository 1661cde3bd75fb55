use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use framerelay_transport::IpcStream;

use crate::codec::{decode_packet, Packet, PacketConfig};
use crate::error::{FrameError, Result};

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    scratch: Vec<u8>,
    config: PacketConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        let chunk = config.buffer_size.max(1);
        Self {
            inner,
            buf: BytesMut::with_capacity(chunk),
            scratch: vec![0u8; chunk],
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.config.max_message_size)? {
                return Ok(packet);
            }

            let read = match self.inner.read(&mut self.scratch) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&self.scratch[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketReader<IpcStream> {
    /// Create a packet reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: PacketConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: framerelay_transport::TransportError) -> FrameError {
    match err {
        framerelay_transport::TransportError::Io(io)
        | framerelay_transport::TransportError::Accept(io) => FrameError::Io(io),
        framerelay_transport::TransportError::Bind { source, .. }
        | framerelay_transport::TransportError::Listen { source, .. }
        | framerelay_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::codec::encode_packet;

    fn wire(packets: &[Packet]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for packet in packets {
            encode_packet(packet, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_packet() {
        let packet = Packet::new(1111, "SetDetectionType", &b"faces"[..]);
        let mut reader = PacketReader::new(Cursor::new(wire(&[packet.clone()])));
        assert_eq!(reader.read_packet().unwrap(), packet);
    }

    #[test]
    fn read_sequence_then_eof() {
        let packets = [
            Packet::new(1114, "SetDetectedFrame", &b"frame-1"[..]),
            Packet::new(1114, "SetDetectedFrame", &b"frame-2"[..]),
            Packet::new(1115, "EndOfFrame", Bytes::new()),
        ];
        let mut reader = PacketReader::new(Cursor::new(wire(&packets)));

        for expected in &packets {
            assert_eq!(&reader.read_packet().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_packet().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn small_buffer_reassembles_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let packet = Packet::new(1114, "SetDetectedFrame", payload);
        let cfg = PacketConfig {
            buffer_size: 17,
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(wire(&[packet.clone()])), cfg);
        assert_eq!(reader.read_packet().unwrap(), packet);
    }

    #[test]
    fn byte_by_byte_reads() {
        let packet = Packet::new(1112, "SetOrientation", &b"90"[..]);
        let mut reader = PacketReader::new(ByteByByteReader {
            bytes: wire(&[packet.clone()]),
            pos: 0,
        });
        assert_eq!(reader.read_packet().unwrap(), packet);
    }

    #[test]
    fn connection_closed_mid_packet() {
        let mut partial = BytesMut::new();
        partial.put_u32_le(32);
        partial.put_u32_le(1113);
        let mut reader = PacketReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_packet().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn oversized_packet_in_stream() {
        let mut data = BytesMut::new();
        data.put_u32_le(1024);
        let cfg = PacketConfig {
            max_message_size: 16,
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(data.to_vec()), cfg);
        assert!(matches!(
            reader.read_packet().unwrap_err(),
            FrameError::PayloadTooLarge { .. }
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let packet = Packet::new(1113, "GetDetectedFrame", Bytes::new());
        let mut reader = PacketReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[packet.clone()])),
        });
        assert_eq!(reader.read_packet().unwrap(), packet);
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        let packet = Packet::new(1113, "GetDetectedFrame", Bytes::new());
        writer.write_packet(&packet).unwrap();
        assert_eq!(reader.read_packet().unwrap(), packet);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
