//! Relay controller: owns the worker channel and the client listener and runs
//! the dispatch loop between them.
//!
//! Both transports publish on an [`EventHub`](crate::EventHub). The controller
//! installs one sender per hub while the corresponding side is running; the
//! dispatch loop thread drains the shared channel and routes packets through
//! the [`Dispatcher`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use framerelay_frame::PacketCatalog;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::events::{ClientEvent, RelayEvent, WorkerEvent};
use crate::listener::ClientListener;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::worker::{WorkerChannel, WorkerState};

type RelayDispatcher = Dispatcher<WorkerChannel, ClientListener>;

pub struct RelayController {
    config: RelayConfig,
    catalog: Arc<PacketCatalog>,
    worker: Arc<WorkerChannel>,
    listener: Arc<ClientListener>,
    stats: Arc<RelayStats>,
    /// Template sender cloned into the hubs; `None` once shut down.
    events: Mutex<Option<Sender<RelayEvent>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl RelayController {
    /// Validate `config` and spawn the dispatch loop. Nothing is bound yet.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(PacketCatalog::standard());
        let worker = Arc::new(WorkerChannel::new(config.worker.clone()));
        let listener = Arc::new(ClientListener::new(config.client.clone()));
        let stats = Arc::new(RelayStats::new());

        let dispatcher = Dispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&worker),
            Arc::clone(&listener),
            Arc::clone(&stats),
        );
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("framerelay-dispatch".to_string())
            .spawn(move || dispatch_loop(dispatcher, rx))
            .map_err(|err| RelayError::Transport(err.into()))?;

        Ok(Self {
            config,
            catalog,
            worker,
            listener,
            stats,
            events: Mutex::new(Some(tx)),
            dispatch: Mutex::new(Some(handle)),
        })
    }

    /// Subscribe to worker events and connect the worker channel.
    ///
    /// Connects only if the channel is not already Connecting or Connected,
    /// so repeated calls make at most one connect attempt.
    pub fn start_pipeline(&self) -> Result<()> {
        let tx = self.sender()?;
        if self.worker.events().install(tx) {
            debug!("replaced worker event subscription");
        }

        let state = self.worker.state();
        if matches!(state, WorkerState::Connecting | WorkerState::Connected) {
            debug!(%state, "pipeline already started");
            return Ok(());
        }
        self.worker.connect().inspect_err(|err| {
            error!(error = %err, "pipeline failed to start");
        })
    }

    /// Close the worker channel if it is open and drop the subscription.
    pub fn stop_pipeline(&self) {
        match self.worker.state() {
            WorkerState::Disconnected | WorkerState::Closed => {
                debug!("pipeline not running");
            }
            WorkerState::Connecting | WorkerState::Connected => self.worker.close(),
        }
        self.worker.events().remove();
    }

    /// Bind the client port, start accepting and subscribe to client events.
    ///
    /// Each step runs only if the previous one succeeded. Failures are logged
    /// and returned; on failure no client subscription is left installed.
    pub fn start(&self) -> Result<()> {
        let tx = self.sender()?;

        let listening = self.listener.start_listening().inspect_err(|err| {
            error!(error = %err, "client listener failed to start");
        })?;
        info!("{listening}");

        // Subscribe before the accept loop runs so the first client's events
        // are not lost; undo it if accepting fails.
        self.listener.events().install(tx);
        match self.listener.start_accepting() {
            Ok(accepting) => {
                info!("{accepting}");
                Ok(())
            }
            Err(err) => {
                self.listener.events().remove();
                error!(error = %err, "client listener failed to accept");
                Err(err)
            }
        }
    }

    /// Shut the client listener down if it is listening.
    pub fn stop(&self) -> Result<()> {
        if !self.listener.is_listening() {
            debug!("client listener not running");
            return Ok(());
        }
        let result = self.listener.shutdown();
        self.listener.events().remove();
        match result {
            Ok(message) => {
                info!("{message}");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "client listener failed to stop");
                Err(err)
            }
        }
    }

    /// Stop both sides and join the dispatch loop. Idempotent.
    pub fn shutdown(&self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "ignoring client listener error during shutdown");
        }
        self.stop_pipeline();

        // Once the hubs and the template sender are gone the loop sees a
        // closed channel.
        lock(&self.events).take();
        if let Some(handle) = lock(&self.dispatch).take() {
            if handle.join().is_err() {
                error!("dispatch loop panicked");
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn worker(&self) -> &WorkerChannel {
        &self.worker
    }

    pub fn listener(&self) -> &ClientListener {
        &self.listener
    }

    pub fn catalog(&self) -> &PacketCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn sender(&self) -> Result<Sender<RelayEvent>> {
        lock(&self.events).clone().ok_or(RelayError::Stopped)
    }
}

impl Drop for RelayController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(dispatcher: RelayDispatcher, rx: Receiver<RelayEvent>) {
    debug!("dispatch loop started");
    for event in rx {
        match event {
            RelayEvent::Worker(event) => on_worker_event(&dispatcher, event),
            RelayEvent::Client(event) => on_client_event(&dispatcher, event),
        }
    }
    debug!("dispatch loop stopped");
}

fn on_worker_event(dispatcher: &RelayDispatcher, event: WorkerEvent) {
    match event {
        WorkerEvent::Connected { pid } => info!(pid, "pipeline connected"),
        WorkerEvent::Received(packet) => {
            debug!(code = packet.code, name = %packet.name, "received from pipeline");
            // Failures are logged and counted by the dispatcher.
            let _ = dispatcher.on_worker_message(packet);
        }
        WorkerEvent::Sent(packet) => {
            debug!(code = packet.code, name = %packet.name, "sent to pipeline");
        }
        WorkerEvent::Closed => info!("pipeline closed"),
        WorkerEvent::Exception(err) => error!(error = %err, "pipeline exception"),
    }
}

fn on_client_event(dispatcher: &RelayDispatcher, event: ClientEvent) {
    match event {
        ClientEvent::Connected { id, endpoint } => {
            info!(client = %id, %endpoint, "client connected");
        }
        ClientEvent::Received { id, packet } => {
            debug!(client = %id, code = packet.code, "received from client");
            dispatcher.on_client_message(id, packet);
        }
        ClientEvent::Sent { id, packet } => {
            debug!(client = %id, code = packet.code, name = %packet.name, "sent to client");
        }
        ClientEvent::Disconnected { id, reason } => {
            info!(client = %id, reason = %reason, "client disconnected");
        }
        ClientEvent::Exception { id, error } => {
            error!(client = %id, error = %error, "client exception");
        }
        ClientEvent::ServerException(err) => error!(error = %err, "client listener exception"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::path::Path;
    use std::time::Duration;

    use bytes::Bytes;

    use framerelay_frame::{Packet, PacketConfig, PacketReader, PacketWriter};
    use framerelay_transport::{IpcStream, TcpSocket, UnixDomainSocket};

    use super::*;
    use crate::config::{ClientConfig, WorkerConfig};
    use crate::test_support::{cleanup, eventually, make_sock_path};

    fn test_config(socket_path: &Path) -> RelayConfig {
        RelayConfig {
            client: ClientConfig {
                bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
                max_backlog: 16,
                ..ClientConfig::default()
            },
            worker: WorkerConfig {
                socket_path: socket_path.to_path_buf(),
                ..WorkerConfig::default()
            },
        }
    }

    fn attach_worker(controller: &RelayController) -> IpcStream {
        controller.start_pipeline().unwrap();
        let worker = UnixDomainSocket::connect(controller.worker().socket_path()).unwrap();
        assert!(eventually(|| controller.worker().is_connected()));
        worker
    }

    fn attach_client(controller: &RelayController) -> IpcStream {
        let addr: SocketAddr = controller.listener().local_addr().unwrap();
        let before = controller.listener().registry().len();
        let client = TcpSocket::connect(addr).unwrap();
        assert!(eventually(|| controller.listener().registry().len() == before + 1));
        client
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = test_config(Path::new("/tmp/unused.sock"));
        config.client.header_size = 8;
        assert!(matches!(
            RelayController::new(config),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn start_pipeline_twice_connects_once() {
        let path = make_sock_path("pipeline");
        let controller = RelayController::new(test_config(&path)).unwrap();

        controller.start_pipeline().unwrap();
        controller.start_pipeline().unwrap();
        assert_eq!(controller.worker().connect_attempts(), 1);
        assert_eq!(controller.worker().state(), WorkerState::Connecting);

        controller.stop_pipeline();
        assert_eq!(controller.worker().state(), WorkerState::Closed);
        assert!(!controller.worker().events().is_installed());
        cleanup(&path);
    }

    #[test]
    fn stop_pipeline_before_start_is_noop() {
        let path = make_sock_path("nopipe");
        let controller = RelayController::new(test_config(&path)).unwrap();
        controller.stop_pipeline();
        assert_eq!(controller.worker().state(), WorkerState::Disconnected);
        assert_eq!(controller.worker().connect_attempts(), 0);
        cleanup(&path);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let path = make_sock_path("nostop");
        let controller = RelayController::new(test_config(&path)).unwrap();
        controller.stop().unwrap();
        assert!(!controller.listener().is_listening());
        cleanup(&path);
    }

    #[test]
    fn relays_request_and_responses() {
        let path = make_sock_path("e2e");
        let controller = RelayController::new(test_config(&path)).unwrap();
        let worker = attach_worker(&controller);
        controller.start().unwrap();
        let client = attach_client(&controller);

        let mut client_writer = PacketWriter::new(client.try_clone().unwrap());
        client_writer
            .write_packet(&Packet::new(1113, "whatever", Bytes::new()))
            .unwrap();

        let mut worker_reader = PacketReader::new(worker.try_clone().unwrap());
        let request = worker_reader.read_packet().unwrap();
        assert_eq!(request, Packet::new(1113, "GetDetectedFrame", Bytes::new()));

        let frame = Bytes::from_static(b"frame-bytes");
        let mut worker_writer = PacketWriter::new(worker);
        worker_writer
            .write_packet(&Packet::new(1114, "SetDetectedFrame", frame.clone()))
            .unwrap();
        worker_writer
            .write_packet(&Packet::new(1115, "EndOfFrame", Bytes::new()))
            .unwrap();

        let mut client_reader = PacketReader::new(client);
        assert_eq!(
            client_reader.read_packet().unwrap(),
            Packet::new(1114, "SetDetectedFrame", frame)
        );
        assert_eq!(client_reader.read_packet().unwrap().code, 1115);

        // Counters move after the write, so the client can see the packets first.
        assert!(eventually(|| controller.stats().relayed_to_client == 2));
        assert_eq!(controller.stats().forwarded_to_worker, 1);

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn stalled_client_does_not_hold_up_other_traffic() {
        let path = make_sock_path("stalled");
        let mut config = test_config(&path);
        config.client.send_queue = 2;
        let controller = RelayController::new(config).unwrap();
        let worker = attach_worker(&controller);
        controller.start().unwrap();
        // The first client is active and never reads.
        let _stalled = attach_client(&controller);
        let other = attach_client(&controller);

        let frame = Bytes::from(vec![0u8; 1 << 20]);
        let mut worker_writer = PacketWriter::new(worker.try_clone().unwrap());
        for _ in 0..40 {
            worker_writer
                .write_packet(&Packet::new(1114, "SetDetectedFrame", frame.clone()))
                .unwrap();
        }
        PacketWriter::new(other)
            .write_packet(&Packet::new(1111, "SetDetectionType", &b"face"[..]))
            .unwrap();

        let mut worker_reader = PacketReader::with_config_ipc(
            worker,
            PacketConfig {
                read_timeout: Some(Duration::from_secs(5)),
                ..PacketConfig::default()
            },
        )
        .unwrap();
        assert_eq!(worker_reader.read_packet().unwrap().code, 1111);

        // Every frame was either queued or refused; none is left waiting.
        assert!(eventually(|| {
            let stats = controller.stats();
            stats.relayed_to_client + stats.send_failures == 40
        }));
        assert!(controller.stats().send_failures > 0);

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn unknown_client_code_never_reaches_worker() {
        let path = make_sock_path("unknown");
        let controller = RelayController::new(test_config(&path)).unwrap();
        let worker = attach_worker(&controller);
        controller.start().unwrap();
        let client = attach_client(&controller);

        let mut client_writer = PacketWriter::new(client);
        client_writer
            .write_packet(&Packet::new(9999, "Bogus", &b"x"[..]))
            .unwrap();
        client_writer
            .write_packet(&Packet::new(1111, "SetDetectionType", &b"face"[..]))
            .unwrap();

        // Only the valid packet arrives.
        let mut worker_reader = PacketReader::new(worker);
        assert_eq!(worker_reader.read_packet().unwrap().code, 1111);
        assert!(eventually(|| controller.stats().rejected == 1));

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn client_packets_without_worker_are_counted() {
        let path = make_sock_path("noworker");
        let controller = RelayController::new(test_config(&path)).unwrap();
        controller.start().unwrap();
        let client = attach_client(&controller);

        PacketWriter::new(client)
            .write_packet(&Packet::new(1112, "SetOrientation", &b"90"[..]))
            .unwrap();
        assert!(eventually(|| controller.stats().worker_unavailable == 1));
        assert_eq!(controller.stats().forwarded_to_worker, 0);

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn worker_packet_without_client_is_a_routing_failure() {
        let path = make_sock_path("noclient");
        let controller = RelayController::new(test_config(&path)).unwrap();
        let worker = attach_worker(&controller);

        PacketWriter::new(worker)
            .write_packet(&Packet::new(1114, "SetDetectedFrame", &b"f"[..]))
            .unwrap();
        assert!(eventually(|| controller.stats().routing_failures == 1));

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn start_stop_cycles_deliver_once() {
        let path = make_sock_path("cycles");
        let controller = RelayController::new(test_config(&path)).unwrap();
        let worker = attach_worker(&controller);

        for _ in 0..5 {
            controller.start().unwrap();
            assert!(controller.listener().is_listening());
            controller.stop().unwrap();
            assert!(!controller.listener().is_listening());
            assert!(!controller.listener().events().is_installed());
        }

        controller.start().unwrap();
        let client = attach_client(&controller);
        PacketWriter::new(client)
            .write_packet(&Packet::new(1113, "GetDetectedFrame", Bytes::new()))
            .unwrap();

        let mut worker_reader = PacketReader::new(worker);
        assert_eq!(worker_reader.read_packet().unwrap().code, 1113);
        assert!(eventually(|| controller.stats().forwarded_to_worker == 1));
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(controller.stats().forwarded_to_worker, 1);

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn listen_failure_leaves_no_subscription() {
        let path = make_sock_path("conflict");
        let squatter = ClientListener::new(ClientConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ClientConfig::default()
        });
        squatter.start_listening().unwrap();

        let mut config = test_config(&path);
        config.client.port = squatter.local_addr().unwrap().port();
        let controller = RelayController::new(config).unwrap();

        let err = controller.start().unwrap_err();
        assert!(matches!(err, RelayError::ListenStart(_)));
        assert!(!controller.listener().is_listening());
        assert!(!controller.listener().events().is_installed());

        // The worker side is unaffected.
        controller.start_pipeline().unwrap();
        assert_eq!(controller.worker().state(), WorkerState::Connecting);

        controller.shutdown();
        cleanup(&path);
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let path = make_sock_path("shutdown");
        let controller = RelayController::new(test_config(&path)).unwrap();
        controller.start_pipeline().unwrap();
        controller.start().unwrap();

        controller.shutdown();
        controller.shutdown();
        assert!(!controller.listener().is_listening());
        assert_eq!(controller.worker().state(), WorkerState::Closed);
        assert!(matches!(
            controller.start_pipeline(),
            Err(RelayError::Stopped)
        ));
        assert!(matches!(controller.start(), Err(RelayError::Stopped)));
        cleanup(&path);
    }
}
