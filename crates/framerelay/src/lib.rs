//! Packet relay between remote TCP clients and a single worker process.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix domain socket transports
//! - [`frame`]: Packet framing and the packet catalog
//! - [`relay`]: Worker channel, client listener, dispatch engine and controller

/// Re-export transport types.
pub mod transport {
    pub use framerelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use framerelay_frame::*;
}

/// Re-export relay types.
pub mod relay {
    pub use framerelay_relay::*;
}
