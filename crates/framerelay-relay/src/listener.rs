//! TCP listener for remote clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use framerelay_frame::{FrameError, Packet, PacketReader, PacketWriter};
use framerelay_transport::{IpcStream, TcpSocket};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatch::ClientLink;
use crate::error::{RelayError, Result};
use crate::events::{ClientEvent, ClientId, EventHub};
use crate::registry::ConnectionRegistry;

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Reason reported for clients dropped by [`ClientListener::shutdown`].
const SHUTDOWN_REASON: &str = "listener shut down";

/// Reading half, writing half and outbound queue of a newly admitted client.
type ClientHalves = (
    PacketReader<IpcStream>,
    PacketWriter<IpcStream>,
    Receiver<Packet>,
);

/// One accepted client.
///
/// Writes go through a bounded queue drained by the client's own writer
/// thread, so a client that stops reading only ever stalls itself.
pub struct ClientConnection {
    id: ClientId,
    endpoint: SocketAddr,
    outbound: SyncSender<Packet>,
    control: IpcStream,
}

impl ClientConnection {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Queue one packet for the writer thread without waiting on the socket.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.outbound.try_send(packet).map_err(|err| match err {
            TrySendError::Full(_) => RelayError::SendQueueFull(self.id),
            TrySendError::Disconnected(_) => RelayError::Frame(FrameError::ConnectionClosed),
        })
    }

    /// Shut the socket down, waking the client's reader thread.
    pub fn disconnect(&self) {
        if let Err(err) = self.control.shutdown() {
            debug!(client = %self.id, error = %err, "client shutdown failed");
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Accepts clients and tracks them in a [`ConnectionRegistry`].
///
/// Listening and accepting are separate steps so callers can report which
/// one failed. Each client gets a reader thread that publishes
/// [`ClientEvent`]s on [`events`](Self::events).
pub struct ClientListener {
    config: ClientConfig,
    shared: Arc<Shared>,
    socket: Mutex<Option<Arc<TcpSocket>>>,
    accept: Mutex<Option<AcceptLoop>>,
}

struct AcceptLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Shared {
    config: ClientConfig,
    registry: ConnectionRegistry<ClientConnection>,
    events: EventHub,
    next_id: AtomicU64,
    /// Reader and writer threads of every client admitted so far.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientListener {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.clone(),
                registry: ConnectionRegistry::new(),
                events: EventHub::new(),
                next_id: AtomicU64::new(1),
                threads: Mutex::new(Vec::new()),
            }),
            config,
            socket: Mutex::new(None),
            accept: Mutex::new(None),
        }
    }

    /// Bind the TCP port.
    pub fn start_listening(&self) -> Result<String> {
        let mut slot = lock(&self.socket);
        if let Some(socket) = slot.as_ref() {
            return Ok(format!("already listening on {}", socket.local_addr()));
        }
        let socket = TcpSocket::bind(self.config.socket_addr(), self.config.tcp_options())
            .map_err(|err| RelayError::ListenStart(err.to_string()))?;
        let addr = socket.local_addr();
        *slot = Some(Arc::new(socket));
        Ok(format!(
            "listening on {addr} (backlog {})",
            self.config.max_backlog
        ))
    }

    /// Start the accept loop on the bound port.
    pub fn start_accepting(&self) -> Result<String> {
        let socket = lock(&self.socket)
            .clone()
            .ok_or_else(|| RelayError::AcceptStart("listener is not bound".to_string()))?;
        let addr = socket.local_addr();

        let mut accept = lock(&self.accept);
        if accept.is_some() {
            return Ok(format!("already accepting clients on {addr}"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let loop_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("framerelay-accept".to_string())
            .spawn(move || accept_loop(shared, socket, loop_stop))
            .map_err(|err| RelayError::AcceptStart(err.to_string()))?;
        *accept = Some(AcceptLoop { stop, handle });

        Ok(format!(
            "accepting clients on {addr} (max {} connections)",
            self.config.max_connections
        ))
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.socket).is_some()
    }

    pub fn is_accepting(&self) -> bool {
        lock(&self.accept).is_some()
    }

    /// Bound address, resolved when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.socket).as_ref().map(|socket| socket.local_addr())
    }

    /// Queue a packet for one client.
    ///
    /// Never waits on the client's socket. `Sent` is emitted by the client's
    /// writer thread once the packet is on the wire. A refused packet is left
    /// for the caller to report.
    pub fn send(&self, id: ClientId, packet: Packet) -> Result<()> {
        self.shared
            .registry
            .get(id)
            .ok_or(RelayError::UnknownClient(id))?
            .send(packet)
    }

    /// Stop accepting, disconnect every client and release the port.
    pub fn shutdown(&self) -> Result<String> {
        let Some(socket) = lock(&self.socket).take() else {
            return Err(RelayError::Shutdown("listener is not listening".to_string()));
        };
        let addr = socket.local_addr();

        if let Some(accept) = lock(&self.accept).take() {
            accept.stop.store(true, Ordering::SeqCst);
            if accept.handle.join().is_err() {
                return Err(RelayError::Shutdown("accept thread panicked".to_string()));
            }
        }
        drop(socket);

        let clients = self.shared.registry.drain();
        let count = clients.len();
        for (id, conn) in clients {
            conn.disconnect();
            self.shared.events.emit(ClientEvent::Disconnected {
                id,
                reason: SHUTDOWN_REASON.to_string(),
            });
        }

        let threads = std::mem::take(&mut *lock(&self.shared.threads));
        for thread in threads {
            if thread.join().is_err() {
                warn!("client thread panicked");
            }
        }

        Ok(format!(
            "stopped listening on {addr}, disconnected {count} client(s)"
        ))
    }

    pub fn registry(&self) -> &ConnectionRegistry<ClientConnection> {
        &self.shared.registry
    }

    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl ClientLink for ClientListener {
    fn active_client(&self) -> Option<ClientId> {
        self.shared.registry.active_id()
    }

    fn send_to(&self, id: ClientId, packet: Packet) -> Result<()> {
        self.send(id, packet)
    }
}

impl Drop for ClientListener {
    fn drop(&mut self) {
        if self.is_listening() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "client listener shutdown failed");
            }
        }
    }
}

fn accept_loop(shared: Arc<Shared>, socket: Arc<TcpSocket>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match socket.try_accept() {
            Ok(Some(stream)) => shared.admit(stream, &stop),
            Ok(None) => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(error = %err, "client accept failed");
                shared
                    .events
                    .emit(ClientEvent::ServerException(err.to_string()));
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!(addr = %socket.local_addr(), "accept loop stopped");
}

impl Shared {
    fn admit(self: &Arc<Self>, stream: IpcStream, stop: &Arc<AtomicBool>) {
        let Some(endpoint) = stream.peer_addr() else {
            debug!("client left before it could be registered");
            return;
        };
        if self.registry.len() >= self.config.max_connections {
            warn!(
                %endpoint,
                max = self.config.max_connections,
                "refusing client: connection limit reached"
            );
            let _ = stream.shutdown();
            return;
        }

        let id = ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer, outbound) = match self.split(id, endpoint, stream) {
            Ok(halves) => halves,
            Err(err) => {
                warn!(client = %id, %endpoint, error = %err, "failed to set up client stream");
                self.events
                    .emit(ClientEvent::ServerException(err.to_string()));
                return;
            }
        };

        info!(client = %id, %endpoint, "client connected");
        self.events.emit(ClientEvent::Connected { id, endpoint });

        let shared = Arc::clone(self);
        let writer_thread = thread::Builder::new()
            .name(format!("framerelay-{id}-out"))
            .spawn(move || shared.write_out(id, writer, outbound));
        let shared = Arc::clone(self);
        let stop = Arc::clone(stop);
        let spawned = writer_thread.and_then(|writer_thread| {
            self.track(writer_thread);
            thread::Builder::new()
                .name(format!("framerelay-{id}"))
                .spawn(move || shared.serve(id, reader, &stop))
        });
        match spawned {
            Ok(reader_thread) => self.track(reader_thread),
            Err(err) => {
                warn!(client = %id, error = %err, "failed to spawn client thread");
                if let Some(conn) = self.registry.remove(id) {
                    conn.disconnect();
                }
                self.events.emit(ClientEvent::Disconnected {
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut threads = lock(&self.threads);
        threads.retain(|thread| !thread.is_finished());
        threads.push(handle);
    }

    /// Register the connection and hand back its reading half, its writing
    /// half and the receiving end of its outbound queue.
    fn split(
        &self,
        id: ClientId,
        endpoint: SocketAddr,
        stream: IpcStream,
    ) -> Result<ClientHalves> {
        let config = self.config.packet_config();
        let reader = PacketReader::with_config_ipc(stream.try_clone()?, config.clone())?;
        let control = stream.try_clone()?;
        let writer = PacketWriter::with_config_ipc(stream, config)?;
        let (outbound, queued) = mpsc::sync_channel(self.config.send_queue);
        self.registry.insert(
            id,
            Arc::new(ClientConnection {
                id,
                endpoint,
                outbound,
                control,
            }),
        );
        Ok((reader, writer, queued))
    }

    /// Drain one client's outbound queue onto its socket.
    ///
    /// Ends once the connection leaves the registry and its queue sender is
    /// dropped, or when the socket fails.
    fn write_out(
        &self,
        id: ClientId,
        mut writer: PacketWriter<IpcStream>,
        queued: Receiver<Packet>,
    ) {
        for packet in queued {
            match writer.write_packet(&packet) {
                Ok(()) => {
                    self.events.emit(ClientEvent::Sent { id, packet });
                }
                Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed)) => {
                    // Clients already dropped from the registry were reported.
                    if let Some(conn) = self.registry.get(id) {
                        warn!(client = %id, code = packet.code, error = %err, "write to client failed");
                        self.events.emit(ClientEvent::Exception {
                            id,
                            error: err.to_string(),
                        });
                        // Wakes the reader, which unregisters the client.
                        conn.disconnect();
                    }
                    break;
                }
                Err(err) => {
                    warn!(client = %id, code = packet.code, error = %err, "packet not sent to client");
                    self.events.emit(ClientEvent::Exception {
                        id,
                        error: err.to_string(),
                    });
                }
            }
        }
        debug!(client = %id, "client writer stopped");
    }

    fn serve(&self, id: ClientId, mut reader: PacketReader<IpcStream>, stop: &AtomicBool) {
        let reason = loop {
            match reader.read_packet() {
                Ok(packet) => {
                    debug!(client = %id, code = packet.code, size = packet.payload.len(), "packet from client");
                    self.events.emit(ClientEvent::Received { id, packet });
                }
                Err(FrameError::ConnectionClosed) => break "connection closed by peer".to_string(),
                Err(_) if stop.load(Ordering::SeqCst) => break SHUTDOWN_REASON.to_string(),
                Err(err) => {
                    warn!(client = %id, error = %err, "client stream failed");
                    self.events.emit(ClientEvent::Exception {
                        id,
                        error: err.to_string(),
                    });
                    break err.to_string();
                }
            }
        };

        // Clients drained by shutdown were already reported.
        if let Some(conn) = self.registry.remove(id) {
            conn.disconnect();
            info!(client = %id, reason = %reason, "client disconnected");
            self.events.emit(ClientEvent::Disconnected { id, reason });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
