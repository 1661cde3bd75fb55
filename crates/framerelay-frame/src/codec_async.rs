//! `tokio_util::codec` adapter for hosts that drive relay streams from tokio.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_packet, encode_packet, Packet, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::FrameError;

/// Packet codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_message_size: usize,
}

impl PacketCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_packet(src, self.max_message_size)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body_len() > self.max_message_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.body_len(),
                max: self.max_message_size,
            });
        }
        encode_packet(&item, dst)
    }
}
