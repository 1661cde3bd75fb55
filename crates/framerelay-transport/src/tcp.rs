use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Socket-level options applied by [`TcpSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOptions {
    /// Pending-connection queue length passed to `listen(2)`.
    pub backlog: u32,
    /// Enable `SO_KEEPALIVE` on accepted connections.
    pub keep_alive: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            backlog: 128,
            keep_alive: false,
        }
    }
}

/// TCP listener for relay clients.
///
/// Like [`UnixDomainSocket`](crate::UnixDomainSocket), the listener itself is
/// non-blocking and accepted streams are blocking.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: TcpOptions,
}

impl TcpSocket {
    /// Bind and listen on `addr`.
    pub fn bind(addr: SocketAddr, options: TcpOptions) -> Result<Self> {
        let listen_err = |source: std::io::Error| TransportError::Listen {
            addr: addr.to_string(),
            source,
        };

        let listener = TcpListener::bind(addr).map_err(listen_err)?;
        #[cfg(unix)]
        apply_backlog(&listener, options.backlog).map_err(listen_err)?;
        listener.set_nonblocking(true).map_err(listen_err)?;
        let local_addr = listener.local_addr().map_err(listen_err)?;

        info!(%local_addr, backlog = options.backlog, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when no client is waiting.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(%peer, error = %err, "failed to disable nagle");
                }
                if self.options.keep_alive {
                    if let Err(err) = set_keep_alive(&stream) {
                        warn!(%peer, error = %err, "failed to enable keep-alive");
                    }
                }
                debug!(%peer, "accepted tcp connection");
                Ok(Some(IpcStream::from_tcp(stream)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening relay (blocking).
    pub fn connect(addr: SocketAddr) -> Result<IpcStream> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            target: addr.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to tcp socket");
        Ok(IpcStream::from_tcp(stream))
    }

    /// The address this socket is bound to (resolved port when bound to 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Options this socket was bound with.
    pub fn options(&self) -> TcpOptions {
        self.options
    }
}

/// Re-issue `listen(2)` with the configured backlog.
///
/// std binds with a fixed backlog; calling `listen` again on a listening
/// socket only updates the queue length.
#[cfg(unix)]
fn apply_backlog(listener: &TcpListener, backlog: u32) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
    // SAFETY: the descriptor is an open, bound TCP socket owned by `listener`.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn set_keep_alive(stream: &TcpStream) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let enable: libc::c_int = 1;
    // SAFETY: `enable` is a valid readable c_int for the provided size, and the
    // descriptor is an open TCP socket owned by `stream`.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            (&enable as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_keep_alive(_stream: &TcpStream) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "keep-alive requires a unix platform",
    ))
}
