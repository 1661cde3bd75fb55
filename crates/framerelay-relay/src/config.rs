use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use framerelay_frame::{PacketConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use framerelay_transport::TcpOptions;
use serde::Serialize;

use crate::error::{RelayError, Result};

/// Default client listener port.
pub const DEFAULT_PORT: u16 = 1669;
/// Default pending-connection backlog.
pub const DEFAULT_MAX_BACKLOG: u32 = 1000;
/// Default cap on simultaneously connected clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 500;
/// Default number of packets queued per peer before sends are refused.
pub const DEFAULT_SEND_QUEUE: usize = 32;
/// The worker channel serves exactly one endpoint.
pub const MAX_WORKER_ENDPOINTS: usize = 1;

/// Client listener tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub max_backlog: u32,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub buffer_size: usize,
    /// Frame header size in bytes; only the 4-byte length header is supported.
    pub header_size: usize,
    pub keep_alive: bool,
    /// Outbound packets buffered per client. A client that falls this far
    /// behind has further packets refused instead of stalling the relay.
    pub send_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_backlog: DEFAULT_MAX_BACKLOG,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            header_size: HEADER_SIZE,
            keep_alive: false,
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

impl ClientConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            backlog: self.max_backlog,
            keep_alive: self.keep_alive,
        }
    }

    pub fn packet_config(&self) -> PacketConfig {
        PacketConfig {
            max_message_size: self.max_message_size,
            buffer_size: self.buffer_size,
            ..PacketConfig::default()
        }
    }
}

/// Worker channel tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerConfig {
    /// Unix domain socket the worker connects to.
    pub socket_path: PathBuf,
    pub buffer_size: usize,
    pub max_message_size: usize,
    /// Outbound packets buffered for the worker before sends are refused.
    pub send_queue: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("framerelay-worker.sock"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

impl WorkerConfig {
    pub fn packet_config(&self) -> PacketConfig {
        PacketConfig {
            max_message_size: self.max_message_size,
            buffer_size: self.buffer_size,
            ..PacketConfig::default()
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayConfig {
    pub client: ClientConfig,
    pub worker: WorkerConfig,
}

impl RelayConfig {
    /// Check every knob, reporting the first invalid one.
    pub fn validate(&self) -> Result<()> {
        let client = &self.client;
        if client.header_size != HEADER_SIZE {
            return Err(invalid(format!(
                "header size {} unsupported (frames use a {HEADER_SIZE}-byte length header)",
                client.header_size
            )));
        }
        if client.max_connections == 0 {
            return Err(invalid("max connections must be at least 1"));
        }
        if client.max_backlog == 0 {
            return Err(invalid("max backlog must be at least 1"));
        }
        for (what, value) in [
            ("client buffer size", client.buffer_size),
            ("client max message size", client.max_message_size),
            ("client send queue", client.send_queue),
            ("worker buffer size", self.worker.buffer_size),
            ("worker max message size", self.worker.max_message_size),
            ("worker send queue", self.worker.send_queue),
        ] {
            if value == 0 {
                return Err(invalid(format!("{what} must be non-zero")));
            }
        }
        if self.worker.socket_path.as_os_str().is_empty() {
            return Err(invalid("worker socket path is empty"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RelayError {
    RelayError::InvalidConfig(message.into())
}
