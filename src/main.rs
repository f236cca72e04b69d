//! # Etch Bridge
//!
//! Drive an Etch-A-Sketch style plotter with a dual-stick game controller.
//!
//! The binary wires the library to real hardware and exposes the control
//! surface as JSON lines:
//!
//! - **stdin**: one [`ApiCommand`] per line, e.g.
//!   `{"command":"activate","controller_id":"/dev/input/event5"}`
//! - **stdout**: one [`ApiResponse`] per command, plus every
//!   [`StatusEvent`] push
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, default `config/default.toml`)
//!    - Set up logging (console, plus daily files when `log_dir` is set)
//!    - Open the motion controller serial port and wait for the firmware
//!      to answer
//!    - Report the printer as connected and load the bounds
//!    - Auto-activate `controller.device_id` when configured
//!
//! 2. **Main Loop**
//!    - Answer commands read from stdin
//!    - Re-scan controllers every `refresh_interval_ms`
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Deactivate the running session (bounded wait)
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```
//!
//! Expected output:
//! ```text
//! INFO etch_bridge: Etch Bridge v0.1.0 starting...
//! INFO etch_bridge::device::serial: Opened motion controller at /dev/ttyUSB0 (115200 baud)
//! INFO etch_bridge::device::serial: Motion controller at /dev/ttyUSB0 is ready
//! INFO etch_bridge: Ready, reading commands from stdin
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use etch_bridge::config::{Config, LoggingConfig};
use etch_bridge::controller::gamepad::EvdevScanner;
use etch_bridge::device::profile;
use etch_bridge::device::serial::GcodeSerial;
use etch_bridge::error::BridgeError;
use etch_bridge::session::status::{ApiCommand, ApiResponse, StatusEvent};
use etch_bridge::session::supervisor::{HostEvent, Supervisor};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the daily rolling log
const LOG_FILE_PREFIX: &str = "etch-bridge.log";

type SharedSupervisor = Arc<Mutex<Supervisor>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    let _log_guard = init_logging(&config.logging);

    info!("Etch Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    if config.controller.debug_mode {
        warn!("Debug mode enabled: G-code is logged, not sent");
    }

    let serial = GcodeSerial::open(
        &[config.serial.port.as_str()],
        config.serial.baud_rate,
        Duration::from_millis(config.serial.timeout_ms),
    )
    .context("Failed to open motion controller")?
    .with_ack_timeout(config.serial.ack_timeout());
    serial
        .handshake(config.serial.handshake_timeout())
        .context("Motion controller did not respond")?;
    info!("Motion controller serial port opened at: {}", serial.device_path());

    let auto_activate = config.controller.device_id.clone();
    let refresh_ms = config.controller.refresh_interval_ms;
    let profiles = profile::from_config(&config.printer);

    let mut supervisor = Supervisor::new(
        config,
        Box::new(EvdevScanner::new()),
        profiles,
        Arc::new(serial),
    );
    supervisor.on_event(HostEvent::Connected);
    spawn_status_printer(supervisor.subscribe());
    let supervisor: SharedSupervisor = Arc::new(Mutex::new(supervisor));

    if !auto_activate.is_empty() {
        info!("Auto-activating controller {}", auto_activate);
        let response = with_supervisor(&supervisor, move |s| {
            s.handle_command(ApiCommand::Activate {
                controller_id: Some(auto_activate),
            })
        })
        .await?;
        emit(&response);
    }

    let mut refresh = (refresh_ms > 0).then(|| {
        let mut timer = interval(Duration::from_millis(refresh_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Ready, reading commands from stdin");
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let response = match parse_command(&line) {
                            Ok(command) => {
                                with_supervisor(&supervisor, move |s| s.handle_command(command)).await?
                            }
                            Err(response) => response,
                        };
                        emit(&response);
                    }
                    Ok(None) => {
                        info!("stdin closed, continuing until Ctrl+C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            _ = next_refresh(&mut refresh) => {
                let result = with_supervisor(&supervisor, |s| s.refresh()).await?;
                if let Err(e) = result {
                    warn!("Periodic controller refresh failed: {}", e);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    with_supervisor(&supervisor, |s| s.shutdown()).await??;
    info!("Etch Bridge stopped");
    Ok(())
}

/// Loads `path`, falling back to defaults when it does not exist.
fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).with_context(|| format!("Failed to load configuration from {}", path))
    } else {
        eprintln!("Configuration {} not found, using defaults", path);
        Ok(Config::default())
    }
}

/// Installs the tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes
/// the file writer and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

/// Parses one stdin line, turning malformed input into a failure reply.
fn parse_command(line: &str) -> std::result::Result<ApiCommand, ApiResponse> {
    serde_json::from_str(line.trim()).map_err(|e| {
        warn!("Rejected command {:?}: {}", line, e);
        ApiResponse::failure(&BridgeError::Json(e))
    })
}

/// Runs a blocking supervisor operation off the async workers.
async fn with_supervisor<T, F>(supervisor: &SharedSupervisor, f: F) -> Result<T>
where
    F: FnOnce(&mut Supervisor) -> T + Send + 'static,
    T: Send + 'static,
{
    let supervisor = Arc::clone(supervisor);
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    })
    .await
    .context("Supervisor task failed")?;
    Ok(result)
}

/// Waits for the next refresh tick; never resolves when disabled.
async fn next_refresh(refresh: &mut Option<Interval>) {
    match refresh {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn spawn_status_printer(mut rx: tokio::sync::broadcast::Receiver<StatusEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => emit(&event),
                Err(RecvError::Lagged(missed)) => warn!("Dropped {} status events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Writes one JSON line to stdout.
fn emit<T: Serialize>(payload: &T) {
    match serde_json::to_string(payload) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
