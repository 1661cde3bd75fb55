use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use framerelay_frame::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use framerelay_relay::config::{
    DEFAULT_MAX_BACKLOG, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, DEFAULT_SEND_QUEUE,
};
use framerelay_relay::{ClientConfig, RelayConfig, WorkerConfig};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod catalog;
pub mod send;
pub mod serve;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay until interrupted.
    Serve(ServeArgs),
    /// Send one packet to a relay as a client.
    Send(SendArgs),
    /// Run a stand-in worker that answers frame requests.
    Worker(WorkerArgs),
    /// Print the packet catalog.
    Catalog(CatalogArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Worker(args) => worker::run(args, format),
        Command::Catalog(args) => catalog::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address the client listener binds to.
    #[arg(long, default_value = "0.0.0.0", env = "FRAMERELAY_BIND")]
    pub bind: IpAddr,
    /// Client listener port.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT, env = "FRAMERELAY_PORT")]
    pub port: u16,
    /// Pending-connection backlog.
    #[arg(long, default_value_t = DEFAULT_MAX_BACKLOG, env = "FRAMERELAY_MAX_BACKLOG")]
    pub max_backlog: u32,
    /// Maximum simultaneously connected clients.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "FRAMERELAY_MAX_CONNECTIONS")]
    pub max_connections: usize,
    /// Maximum packet body size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE, env = "FRAMERELAY_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,
    /// Client read buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, env = "FRAMERELAY_BUFFER_SIZE")]
    pub buffer_size: usize,
    /// Frame length header size in bytes.
    #[arg(long, default_value_t = HEADER_SIZE, env = "FRAMERELAY_HEADER_SIZE")]
    pub header_size: usize,
    /// Enable TCP keep-alive on client connections.
    #[arg(long, env = "FRAMERELAY_KEEP_ALIVE")]
    pub keep_alive: bool,
    /// Packets buffered per peer before further sends to it are dropped.
    #[arg(long, default_value_t = DEFAULT_SEND_QUEUE, env = "FRAMERELAY_SEND_QUEUE")]
    pub send_queue: usize,
    /// Unix domain socket the worker connects to.
    #[arg(long, value_name = "PATH", env = "FRAMERELAY_WORKER_SOCKET")]
    pub worker_socket: Option<PathBuf>,
    /// Worker read buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, env = "FRAMERELAY_WORKER_BUFFER_SIZE")]
    pub worker_buffer_size: usize,
}

impl ServeArgs {
    pub fn relay_config(&self) -> RelayConfig {
        let worker_defaults = WorkerConfig::default();
        RelayConfig {
            client: ClientConfig {
                bind_addr: self.bind,
                port: self.port,
                max_backlog: self.max_backlog,
                max_connections: self.max_connections,
                max_message_size: self.max_message_size,
                buffer_size: self.buffer_size,
                header_size: self.header_size,
                keep_alive: self.keep_alive,
                send_queue: self.send_queue,
            },
            worker: WorkerConfig {
                socket_path: self
                    .worker_socket
                    .clone()
                    .unwrap_or(worker_defaults.socket_path),
                buffer_size: self.worker_buffer_size,
                max_message_size: self.max_message_size,
                send_queue: self.send_queue,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay address to connect to.
    pub addr: SocketAddr,
    /// Packet code to send.
    #[arg(long, short = 'c')]
    pub code: u32,
    /// Packet name. Defaults to the catalog name of the code.
    #[arg(long)]
    pub name: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for N response packets and print them.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub wait: usize,
    /// Maximum time to wait for each response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Relay worker socket to connect to.
    #[arg(long, value_name = "PATH", env = "FRAMERELAY_WORKER_SOCKET")]
    pub socket: Option<PathBuf>,
    /// How long to keep retrying until the relay socket appears (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Exit after answering N frame requests.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct CatalogArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Clear `running` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn worker_socket_falls_back_to_default() {
        let args = ServeArgs {
            bind: "127.0.0.1".parse().unwrap(),
            port: 0,
            max_backlog: 1,
            max_connections: 1,
            max_message_size: 64,
            buffer_size: 64,
            header_size: 4,
            keep_alive: false,
            send_queue: 3,
            worker_socket: None,
            worker_buffer_size: 32,
        };
        let config = args.relay_config();
        assert_eq!(config.worker.socket_path, WorkerConfig::default().socket_path);
        assert_eq!(config.worker.buffer_size, 32);
        assert_eq!(config.worker.max_message_size, 64);
        assert_eq!(config.client.send_queue, 3);
        assert_eq!(config.worker.send_queue, 3);
    }
}
