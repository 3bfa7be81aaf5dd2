//! Standalone external monitor runner
//!
//! Loads one external monitor config, runs the proxy and prints every status
//! as a JSON line until Ctrl+C.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plugin_proxy::{register_external_monitor, MonitorRegistry, ProxyError, EXTERNAL_MONITOR_NAME};

/// How long the print loop waits before re-checking for Ctrl+C.
const POLL_SLICE: Duration = Duration::from_millis(500);

struct Args {
    config: PathBuf,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("monitor-proxy - external health-check plugin runner");
                println!();
                println!("USAGE:");
                println!("    monitor-proxy --config <PATH>");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <PATH>       External monitor config file");
                println!("    -h, --help                Print help information");
                println!();
                println!("Log filtering follows RUST_LOG [default: info].");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    match config {
        Some(config) => Args { config },
        None => {
            eprintln!("error: --config is required");
            std::process::exit(1);
        }
    }
}

/// Resolves once Ctrl+C is received, or if the signal handler cannot be
/// installed.
fn ctrl_c_channel() -> std::io::Result<Receiver<()>> {
    let (tx, rx) = bounded::<()>(1);
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new().name("monitor-proxy-signal".to_string()).spawn(move || {
        if let Err(err) = runtime.block_on(tokio::signal::ctrl_c()) {
            warn!(error = %err, "Failed to listen for Ctrl+C");
        }
        let _ = tx.send(());
    })?;
    Ok(rx)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "monitor-proxy starting");

    let mut registry = MonitorRegistry::new();
    register_external_monitor(&mut registry)?;
    let monitor = registry.create(EXTERNAL_MONITOR_NAME, &args.config)?;

    let interrupted = ctrl_c_channel()?;
    let statuses = monitor.start()?;

    loop {
        match interrupted.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }
        match statuses.recv_timeout(POLL_SLICE) {
            Ok(status) => println!("{}", serde_json::to_string(&status)?),
            Err(ProxyError::StreamTimeout { .. }) => {}
            Err(err) => {
                warn!(error = %err, "Status stream ended");
                break;
            }
        }
    }

    monitor.stop();
    info!("monitor-proxy stopped");
    Ok(())
}
