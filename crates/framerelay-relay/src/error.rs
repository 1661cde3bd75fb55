use crate::events::ClientId;

/// Errors raised by the relay engine.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Binding the worker channel failed.
    #[error("worker channel connect failed: {0}")]
    ChannelConnect(String),

    /// The worker channel is not connected.
    #[error("worker channel not connected")]
    NotConnected,

    /// Binding the client listener failed.
    #[error("client listener failed to start listening: {0}")]
    ListenStart(String),

    /// Starting the accept loop failed.
    #[error("client listener failed to start accepting: {0}")]
    AcceptStart(String),

    /// Shutting the client listener down failed.
    #[error("client listener shutdown failed: {0}")]
    Shutdown(String),

    /// The packet code is not in the catalog.
    #[error("invalid packet code: {0}")]
    UnknownCode(u32),

    /// The packet code is known but may not travel this way.
    #[error("packet {name} ({code}) may not be relayed {direction}")]
    WrongDirection {
        code: u32,
        name: String,
        direction: &'static str,
    },

    /// A worker packet arrived while no client was active.
    #[error("no active client to deliver packet {code} to")]
    NoActiveClient { code: u32 },

    /// The client id is not registered.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// The worker is not draining its outbound queue.
    #[error("worker outbound queue is full")]
    WorkerQueueFull,

    /// The client is not draining its outbound queue.
    #[error("outbound queue for {0} is full")]
    SendQueueFull(ClientId),

    /// The controller has been shut down.
    #[error("relay controller has been shut down")]
    Stopped,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] framerelay_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] framerelay_frame::FrameError),

    /// Catalog error.
    #[error("catalog error: {0}")]
    Catalog(#[from] framerelay_frame::CatalogError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
