/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet body exceeds the configured maximum message size.
    #[error("packet too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The packet name does not fit the 1-byte name length field.
    #[error("packet name too long ({len} bytes, max 255)")]
    NameTooLong { len: usize },

    /// The packet name is not valid UTF-8.
    #[error("packet name is not valid utf-8: {0}")]
    InvalidName(#[from] std::str::Utf8Error),

    /// The length header is too small to hold a packet body.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

/// Errors raised by the packet catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// The code is already registered.
    #[error("packet code {code} already registered as {existing}")]
    DuplicateCode { code: u32, existing: String },

    /// The code is not registered.
    #[error("unknown packet code {0}")]
    UnknownCode(u32),
}

pub type Result<T> = std::result::Result<T, FrameError>;
