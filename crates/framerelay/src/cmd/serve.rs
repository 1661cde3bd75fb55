use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framerelay_relay::{RelayController, WorkerState};
use tracing::{debug, error, info};

use crate::cmd::{install_ctrlc_handler, ServeArgs};
use crate::exit::{relay_error, CliResult, SUCCESS};
use crate::output::{print_stats, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Delay between attempts to re-open the worker socket after a failure.
const REARM_RETRY: Duration = Duration::from_secs(1);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.relay_config();
    let controller =
        RelayController::new(config).map_err(|err| relay_error("serve failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    controller
        .start_pipeline()
        .map_err(|err| relay_error("worker channel failed to start", err))?;
    controller
        .start()
        .map_err(|err| relay_error("client listener failed to start", err))?;

    debug!(config = ?controller.config(), "relay configuration");
    info!(
        clients = ?controller.listener().local_addr(),
        worker = ?controller.worker().socket_path(),
        "relay running"
    );

    let mut next_rearm = Instant::now();
    while running.load(Ordering::SeqCst) {
        // A worker that hung up may be replaced by a new one. Clients keep
        // being served while the socket cannot be re-opened.
        if controller.worker().state() == WorkerState::Closed && Instant::now() >= next_rearm {
            info!("worker gone, re-opening worker socket");
            if let Err(err) = controller.start_pipeline() {
                error!(error = %err, retry_in = ?REARM_RETRY, "worker channel failed to restart");
                next_rearm = Instant::now() + REARM_RETRY;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    info!("shutting down");
    controller.shutdown();
    print_stats(&controller.stats(), format);
    Ok(SUCCESS)
}
