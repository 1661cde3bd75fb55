//! Routing rules between clients and the worker.

use std::sync::Arc;

use framerelay_frame::{direction, Direction, Packet, PacketCatalog};
use tracing::{debug, error, warn};

use crate::error::{RelayError, Result};
use crate::events::ClientId;
use crate::stats::RelayStats;

/// The worker side as seen by the dispatcher.
pub trait WorkerLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget send; `RelayError::NotConnected` if the worker is gone.
    fn send(&self, packet: Packet) -> Result<()>;
}

/// The client side as seen by the dispatcher.
pub trait ClientLink: Send + Sync {
    /// Client currently eligible to receive worker packets.
    fn active_client(&self) -> Option<ClientId>;

    /// Send to one client; `RelayError::UnknownClient` if it has left.
    fn send_to(&self, id: ClientId, packet: Packet) -> Result<()>;
}

/// Outcome of routing one client packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDispatch {
    /// Sent to the worker.
    Forwarded { code: u32 },
    /// Unknown code or a code that only travels worker → client.
    Rejected { code: u32 },
    /// Dropped because the worker is not connected.
    WorkerUnavailable { code: u32 },
    /// The worker refused the packet: its queue is full or its socket failed.
    SendFailed { code: u32 },
}

/// Stateless router between the two links.
///
/// Both entry points take `&self` and may be called concurrently; all shared
/// state lives behind the links and the atomic [`RelayStats`].
pub struct Dispatcher<W, C> {
    catalog: Arc<PacketCatalog>,
    worker: Arc<W>,
    clients: Arc<C>,
    stats: Arc<RelayStats>,
}

impl<W: WorkerLink, C: ClientLink> Dispatcher<W, C> {
    pub fn new(
        catalog: Arc<PacketCatalog>,
        worker: Arc<W>,
        clients: Arc<C>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            catalog,
            worker,
            clients,
            stats,
        }
    }

    /// Route a packet received from `client` towards the worker.
    pub fn on_client_message(&self, client: ClientId, packet: Packet) -> ClientDispatch {
        let code = packet.code;
        let packet = match self.canonicalize(packet, Direction::ToWorker) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.record_rejected();
                warn!(client = %client, code, error = %err, "invalid packet from client");
                return ClientDispatch::Rejected { code };
            }
        };

        if !self.worker.is_connected() {
            self.stats.record_worker_unavailable();
            warn!(
                client = %client,
                code,
                name = %packet.name,
                "worker not connected; dropping client packet"
            );
            return ClientDispatch::WorkerUnavailable { code };
        }

        let name = packet.name.clone();
        match self.worker.send(packet) {
            Ok(()) => {
                self.stats.record_forwarded();
                debug!(client = %client, code, name = %name, "forwarded to worker");
                ClientDispatch::Forwarded { code }
            }
            Err(RelayError::NotConnected) => {
                self.stats.record_worker_unavailable();
                warn!(
                    client = %client,
                    code,
                    name = %name,
                    "worker disconnected during send; dropping client packet"
                );
                ClientDispatch::WorkerUnavailable { code }
            }
            Err(err) => {
                self.stats.record_send_failure();
                warn!(client = %client, code, name = %name, error = %err, "send to worker failed");
                ClientDispatch::SendFailed { code }
            }
        }
    }

    /// Deliver a worker packet to the active client.
    ///
    /// Returns the client it was delivered to. With no active client the
    /// packet is not sent anywhere and `RelayError::NoActiveClient` is returned.
    pub fn on_worker_message(&self, packet: Packet) -> Result<ClientId> {
        let code = packet.code;
        let packet = match self.canonicalize(packet, Direction::ToClient) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.record_rejected();
                warn!(code, error = %err, "invalid packet from worker");
                return Err(err);
            }
        };

        let Some(client) = self.clients.active_client() else {
            self.stats.record_routing_failure();
            error!(code, name = %packet.name, "worker packet has no active client");
            return Err(RelayError::NoActiveClient { code });
        };

        let name = packet.name.clone();
        match self.clients.send_to(client, packet) {
            Ok(()) => {
                self.stats.record_relayed();
                debug!(client = %client, code, name = %name, "relayed to client");
                Ok(client)
            }
            Err(RelayError::UnknownClient(_)) => {
                // The active client left between lookup and send.
                self.stats.record_routing_failure();
                error!(client = %client, code, name = %name, "active client left before delivery");
                Err(RelayError::NoActiveClient { code })
            }
            Err(err) => {
                self.stats.record_send_failure();
                error!(client = %client, code, name = %name, error = %err, "send to client failed");
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Check a packet against the catalog and the forwarding table for
    /// `allowed`, and rebuild it with its canonical name.
    fn canonicalize(&self, packet: Packet, allowed: Direction) -> Result<Packet> {
        let name = self
            .catalog
            .lookup(packet.code)
            .map_err(|_| RelayError::UnknownCode(packet.code))?;
        if direction(packet.code) != Some(allowed) {
            return Err(RelayError::WrongDirection {
                code: packet.code,
                name: name.to_string(),
                direction: allowed.as_str(),
            });
        }
        Ok(Packet::new(packet.code, name, packet.payload))
    }
}
