//! Length-prefixed packet framing for framerelay.
//!
//! Every packet on either side of the relay is framed with:
//! - A 4-byte little-endian length header
//! - A 4-byte little-endian packet code
//! - A 1-byte name length followed by the UTF-8 packet name
//! - The opaque payload
//!
//! The [`catalog`] module maps packet codes to their canonical names.

pub mod catalog;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod codec_async;

pub use catalog::{
    direction, Direction, PacketCatalog, END_OF_FRAME, FORWARD_TO_CLIENT, FORWARD_TO_WORKER,
    GET_DETECTED_FRAME, SET_DETECTED_FRAME, SET_DETECTION_TYPE, SET_ORIENTATION,
};
pub use codec::{
    decode_packet, encode_packet, Packet, PacketConfig, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE,
};
pub use error::{CatalogError, FrameError, Result};
pub use reader::PacketReader;
pub use writer::PacketWriter;

#[cfg(feature = "async")]
pub use codec_async::PacketCodec;
