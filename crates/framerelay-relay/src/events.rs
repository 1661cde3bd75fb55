//! Lifecycle and delivery events emitted by the two transports.
//!
//! Each transport owns an [`EventHub`] with at most one subscriber. Installing
//! a subscriber replaces the previous one, so repeated start/stop cycles can
//! never deliver an event twice.

use std::fmt;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};

use framerelay_frame::Packet;

/// Identifier the listener assigns to an accepted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Events emitted by the worker channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The worker attached. `pid` is reported where the platform exposes it.
    Connected { pid: Option<u32> },
    Received(Packet),
    Sent(Packet),
    Closed,
    Exception(String),
}

/// Events emitted by the client listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected {
        id: ClientId,
        endpoint: SocketAddr,
    },
    Received {
        id: ClientId,
        packet: Packet,
    },
    Sent {
        id: ClientId,
        packet: Packet,
    },
    Disconnected {
        id: ClientId,
        reason: String,
    },
    Exception {
        id: ClientId,
        error: String,
    },
    /// Listener-level failure not tied to one client (e.g. accept errors).
    ServerException(String),
}

/// Everything the dispatch loop consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Worker(WorkerEvent),
    Client(ClientEvent),
}

impl From<WorkerEvent> for RelayEvent {
    fn from(event: WorkerEvent) -> Self {
        RelayEvent::Worker(event)
    }
}

impl From<ClientEvent> for RelayEvent {
    fn from(event: ClientEvent) -> Self {
        RelayEvent::Client(event)
    }
}

/// Single-subscriber event outlet.
#[derive(Debug, Default)]
pub struct EventHub {
    subscriber: Mutex<Option<Sender<RelayEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `tx` as the subscriber. Returns `true` if it replaced one.
    pub fn install(&self, tx: Sender<RelayEvent>) -> bool {
        self.slot().replace(tx).is_some()
    }

    /// Remove the subscriber. Returns `true` if one was installed.
    pub fn remove(&self) -> bool {
        self.slot().take().is_some()
    }

    pub fn is_installed(&self) -> bool {
        self.slot().is_some()
    }

    /// Deliver an event to the subscriber, if any.
    ///
    /// Returns whether the event was delivered. A subscriber whose receiver
    /// has gone away is dropped.
    pub fn emit(&self, event: impl Into<RelayEvent>) -> bool {
        let mut slot = self.slot();
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        if tx.send(event.into()).is_ok() {
            true
        } else {
            *slot = None;
            false
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Sender<RelayEvent>>> {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
