//! Unix domain socket channel to the single worker process.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use framerelay_frame::{FrameError, Packet, PacketReader, PacketWriter};
use framerelay_transport::{IpcStream, UnixDomainSocket};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::dispatch::WorkerLink;
use crate::error::{RelayError, Result};
use crate::events::{EventHub, WorkerEvent};

/// How long the accept loop sleeps between polls.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Lifecycle of the worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Connected => "connected",
            WorkerState::Closed => "closed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel to the worker process.
///
/// The relay binds the socket path and the worker connects to it. Exactly one
/// worker endpoint is served per session; once it is accepted the listening
/// path is removed. Events are published on [`events`](Self::events).
///
/// Sends are queued for a per-session writer thread, so a worker that stops
/// reading fills its queue instead of blocking the sender.
pub struct WorkerChannel {
    config: WorkerConfig,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<WorkerState>,
    /// Outbound queue of the current session while Connected.
    outbound: Mutex<Option<SyncSender<Packet>>>,
    /// Clone of the worker stream used to wake the reader on close.
    control: Mutex<Option<IpcStream>>,
    /// Stop flag of the current session. Set exactly once per session.
    session: Mutex<Option<Arc<AtomicBool>>>,
    events: EventHub,
    connect_attempts: AtomicU64,
}

impl WorkerChannel {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::Disconnected),
                outbound: Mutex::new(None),
                control: Mutex::new(None),
                session: Mutex::new(None),
                events: EventHub::new(),
                connect_attempts: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Bind the worker socket and start waiting for the worker.
    ///
    /// No-op while already Connecting or Connected. On bind failure the state
    /// is left unchanged and `RelayError::ChannelConnect` is returned.
    pub fn connect(&self) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if matches!(*state, WorkerState::Connecting | WorkerState::Connected) {
            debug!(state = %*state, "worker channel already started");
            return Ok(());
        }

        let attempt = self.shared.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let socket = UnixDomainSocket::bind(&self.config.socket_path).map_err(|err| {
            warn!(path = ?self.config.socket_path, attempt, error = %err, "worker channel bind failed");
            RelayError::ChannelConnect(err.to_string())
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        *lock(&self.shared.session) = Some(Arc::clone(&stop));
        *state = WorkerState::Connecting;
        drop(state);

        info!(path = ?self.config.socket_path, attempt, "waiting for worker");

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("framerelay-worker".to_string())
            .spawn(move || run_session(shared, socket, stop, config));
        match spawned {
            // A handle left by a previous session belongs to a thread that
            // has already torn down; dropping it detaches it.
            Ok(handle) => {
                *lock(&self.thread) = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.stop_session();
                Err(RelayError::ChannelConnect(format!(
                    "failed to spawn worker thread: {err}"
                )))
            }
        }
    }

    /// Queue a packet for the worker without waiting on the socket.
    ///
    /// `Sent` is emitted once the packet is on the wire.
    pub fn send(&self, packet: Packet) -> Result<()> {
        let outbound = lock(&self.shared.outbound);
        let Some(outbound) = outbound.as_ref() else {
            return Err(RelayError::NotConnected);
        };
        outbound.try_send(packet).map_err(|err| match err {
            TrySendError::Full(_) => RelayError::WorkerQueueFull,
            TrySendError::Disconnected(_) => RelayError::NotConnected,
        })
    }

    /// Close the channel. Idempotent; `Closed` is emitted once per session.
    pub fn close(&self) {
        if !self.shared.stop_session() {
            return;
        }
        let handle = lock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }

    pub fn state(&self) -> WorkerState {
        *lock(&self.shared.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == WorkerState::Connected
    }

    /// Number of times `connect` actually tried to bind.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }
}

impl WorkerLink for WorkerChannel {
    fn is_connected(&self) -> bool {
        WorkerChannel::is_connected(self)
    }

    fn send(&self, packet: Packet) -> Result<()> {
        WorkerChannel::send(self, packet)
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// End the current session, if any. Returns `true` if a session was
    /// stopped by this call.
    fn stop_session(&self) -> bool {
        let Some(stop) = lock(&self.session).take() else {
            return false;
        };
        if stop.swap(true, Ordering::SeqCst) {
            // The session thread already tore down.
            return true;
        }
        self.teardown();
        info!("worker channel closed");
        self.events.emit(WorkerEvent::Closed);
        true
    }

    /// Called by the session thread when the worker goes away on its own.
    fn finish_session(&self, stop: &AtomicBool) {
        if stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown();
        info!("worker disconnected");
        self.events.emit(WorkerEvent::Closed);
    }

    fn teardown(&self) {
        *lock(&self.state) = WorkerState::Closed;
        // Shut the stream down first so a blocked write fails and the writer
        // thread drains out once its queue sender is dropped.
        if let Some(control) = lock(&self.control).take() {
            if let Err(err) = control.shutdown() {
                debug!(error = %err, "worker stream shutdown failed");
            }
        }
        lock(&self.outbound).take();
    }
}

fn run_session(
    shared: Arc<Shared>,
    socket: UnixDomainSocket,
    stop: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    let stream = loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match socket.try_accept() {
            Ok(Some(stream)) => break stream,
            Ok(None) => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(error = %err, "worker accept failed");
                shared.events.emit(WorkerEvent::Exception(err.to_string()));
                thread::sleep(ACCEPT_POLL);
            }
        }
    };
    // One endpoint per session: stop listening and remove the path.
    drop(socket);

    let (reader, writer) = match attach(&shared, stream, &stop, &config) {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "failed to set up worker stream");
            shared.events.emit(WorkerEvent::Exception(err.to_string()));
            shared.finish_session(&stop);
            return;
        }
    };

    read_loop(&shared, reader, &stop);
    shared.finish_session(&stop);
    // Teardown dropped the queue sender, so the writer is on its way out.
    if writer.join().is_err() {
        warn!("worker writer thread panicked");
    }
}

/// Start the session's writer thread, publish its queue and move to
/// Connected.
///
/// Returns `None` if the session was closed while accepting.
fn attach(
    shared: &Arc<Shared>,
    stream: IpcStream,
    stop: &Arc<AtomicBool>,
    config: &WorkerConfig,
) -> Result<Option<(PacketReader<IpcStream>, JoinHandle<()>)>> {
    let pid = stream.peer_credentials().map(|(_, _, pid)| pid);
    let packet_config = config.packet_config();
    let reader = PacketReader::with_config_ipc(stream.try_clone()?, packet_config.clone())?;
    let control = stream.try_clone()?;
    let wake = stream.try_clone()?;
    let writer = PacketWriter::with_config_ipc(stream, packet_config)?;

    let mut state = lock(&shared.state);
    if stop.load(Ordering::SeqCst) {
        let _ = control.shutdown();
        return Ok(None);
    }
    let (outbound, queued) = mpsc::sync_channel(config.send_queue);
    let writer_shared = Arc::clone(shared);
    let writer_stop = Arc::clone(stop);
    let writer_thread = thread::Builder::new()
        .name("framerelay-worker-out".to_string())
        .spawn(move || write_out(&writer_shared, writer, queued, wake, &writer_stop))
        .map_err(|err| RelayError::Transport(err.into()))?;
    *lock(&shared.outbound) = Some(outbound);
    *lock(&shared.control) = Some(control);
    *state = WorkerState::Connected;
    info!(pid, "worker connected");
    // Emitted under the state lock so it cannot trail a concurrent Closed.
    shared.events.emit(WorkerEvent::Connected { pid });
    Ok(Some((reader, writer_thread)))
}

/// Drain the session's outbound queue onto the worker socket.
///
/// A write failure shuts the stream down through `wake`; the reader then
/// sees the hangup and closes the session.
fn write_out(
    shared: &Shared,
    mut writer: PacketWriter<IpcStream>,
    queued: Receiver<Packet>,
    wake: IpcStream,
    stop: &AtomicBool,
) {
    for packet in queued {
        match writer.write_packet(&packet) {
            Ok(()) => {
                shared.events.emit(WorkerEvent::Sent(packet));
            }
            Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed)) => {
                if !stop.load(Ordering::SeqCst) {
                    warn!(code = packet.code, error = %err, "write to worker failed");
                    shared.events.emit(WorkerEvent::Exception(err.to_string()));
                    let _ = wake.shutdown();
                }
                break;
            }
            Err(err) => {
                warn!(code = packet.code, error = %err, "packet not sent to worker");
                shared.events.emit(WorkerEvent::Exception(err.to_string()));
            }
        }
    }
    debug!("worker writer stopped");
}

fn read_loop(shared: &Shared, mut reader: PacketReader<IpcStream>, stop: &AtomicBool) {
    loop {
        let result = reader.read_packet();
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match result {
            Ok(packet) => {
                debug!(code = packet.code, size = packet.payload.len(), "packet from worker");
                shared.events.emit(WorkerEvent::Received(packet));
            }
            Err(FrameError::ConnectionClosed) => return,
            Err(err) => {
                // The byte stream cannot be resynchronised after a bad frame.
                warn!(error = %err, "worker stream failed");
                shared.events.emit(WorkerEvent::Exception(err.to_string()));
                return;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
