//! Stream transports for framerelay.
//!
//! Two listeners feed the relay:
//! - [`TcpSocket`] accepts remote clients on a TCP port
//! - [`UnixDomainSocket`] accepts the single worker process (Linux/macOS)
//!
//! Both hand out the same [`IpcStream`] type, so the frame layer above never
//! cares which side of the relay a byte stream came from.

pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use tcp::{TcpOptions, TcpSocket};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
