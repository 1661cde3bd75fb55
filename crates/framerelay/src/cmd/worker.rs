use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framerelay_frame::{
    FrameError, Packet, PacketConfig, PacketReader, PacketWriter, END_OF_FRAME,
    GET_DETECTED_FRAME, SET_DETECTED_FRAME, SET_DETECTION_TYPE, SET_ORIENTATION,
};
use framerelay_relay::WorkerConfig;
use framerelay_transport::{IpcStream, UnixDomainSocket};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, WorkerArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_packet, OutputFormat};

/// Read timeout used to notice Ctrl-C while idle.
const IDLE_POLL: Duration = Duration::from_millis(200);

pub fn run(args: WorkerArgs, format: OutputFormat) -> CliResult<i32> {
    let path = args
        .socket
        .clone()
        .unwrap_or_else(|| WorkerConfig::default().socket_path);
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let stream = connect_with_retry(&path, connect_timeout)?;
    info!(path = ?path, "worker attached to relay");

    let reader_stream = stream
        .try_clone()
        .map_err(|err| transport_error("worker setup failed", err))?;
    let config = PacketConfig {
        read_timeout: Some(IDLE_POLL),
        ..PacketConfig::default()
    };
    let mut reader = PacketReader::with_config_ipc(reader_stream, config)
        .map_err(|err| frame_error("worker setup failed", err))?;
    let mut writer = PacketWriter::new(stream);

    let mut answered = 0usize;
    while running.load(Ordering::SeqCst) {
        let packet = match reader.read_packet() {
            Ok(packet) => packet,
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                info!("relay closed the worker channel");
                break;
            }
            Err(err) => return Err(frame_error("receive failed", err)),
        };

        print_packet(&packet, "relay", format);
        for response in respond(&packet) {
            writer
                .write_packet(&response)
                .map_err(|err| frame_error("reply failed", err))?;
        }

        if packet.code == GET_DETECTED_FRAME {
            answered += 1;
            if args.count.is_some_and(|count| answered >= count) {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

/// Packets to send back for one request.
///
/// A frame request is answered with the request payload as the frame,
/// followed by the end-of-frame marker. Settings are acknowledged in the log
/// only.
fn respond(packet: &Packet) -> Vec<Packet> {
    match packet.code {
        GET_DETECTED_FRAME => vec![
            Packet::new(SET_DETECTED_FRAME, "SetDetectedFrame", packet.payload.clone()),
            Packet::new(END_OF_FRAME, "EndOfFrame", Vec::new()),
        ],
        SET_DETECTION_TYPE | SET_ORIENTATION => {
            info!(code = packet.code, name = %packet.name, size = packet.payload.len(), "setting received");
            Vec::new()
        }
        other => {
            warn!(code = other, "unexpected packet from relay");
            Vec::new()
        }
    }
}

fn connect_with_retry(path: &Path, timeout: Duration) -> CliResult<IpcStream> {
    let start = Instant::now();
    loop {
        match UnixDomainSocket::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect to {} timed out: {err}", path.display()),
                    ));
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}
