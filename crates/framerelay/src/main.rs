mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "framerelay",
    version,
    about = "Relay packets between TCP clients and a worker process"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log lines buffered before new lines are dropped.
    #[arg(
        long,
        value_name = "LINES",
        default_value_t = logging::DEFAULT_LOG_BUFFER,
        env = "FRAMERELAY_LOG_BUFFER",
        global = true
    )]
    log_buffer: usize,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    let guard = init_logging(cli.log_format, cli.log_level, cli.log_buffer);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    // Flush buffered log lines before exiting.
    drop(guard);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "framerelay",
            "send",
            "127.0.0.1:1669",
            "--code",
            "1111",
            "--data",
            "face",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "framerelay",
            "send",
            "127.0.0.1:1669",
            "--code",
            "1111",
            "--data",
            "face",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn serve_defaults_match_relay_config() {
        let cli = Cli::try_parse_from(["framerelay", "serve"]).expect("serve should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.relay_config();
        assert_eq!(config, framerelay_relay::RelayConfig::default());
        assert_eq!(cli.log_buffer, 3000);
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "framerelay",
            "serve",
            "--port",
            "7000",
            "--bind",
            "127.0.0.1",
            "--max-connections",
            "2",
            "--keep-alive",
            "--worker-socket",
            "/tmp/w.sock",
        ])
        .expect("serve should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.relay_config();
        assert_eq!(config.client.port, 7000);
        assert_eq!(config.client.max_connections, 2);
        assert!(config.client.keep_alive);
        assert_eq!(config.worker.socket_path, std::path::PathBuf::from("/tmp/w.sock"));
    }
}
