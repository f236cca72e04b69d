//! # Serial G-code Sink
//!
//! Delivers G-code to a motion controller (Marlin-style firmware) over a
//! USB serial link.
//!
//! ## Flow Control
//!
//! The firmware only buffers a handful of commands, so every line is
//! written, flushed and then held until the firmware answers `ok`. Other
//! replies are logged and skipped; `echo:busy` keepalives restart the
//! acknowledgement wait. A missing `ok` marks the sink non-operational
//! until the next acknowledged line.
//!
//! ## Handshake
//!
//! Many boards reboot when the port opens and drop whatever arrives during
//! the bootloader window. A freshly opened sink reports non-operational
//! until [`GcodeSerial::handshake`] got an answer to `M110 N0`.

pub mod port_trait;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::device::DeviceSink;
use crate::error::{BridgeError, Result};
use port_trait::{NativeSerialPort, SerialPortIO};

/// Line sent until the firmware answers after open
const HANDSHAKE_COMMAND: &str = "M110 N0";

/// Longest single handshake attempt before the line is resent
const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);

/// Acknowledgement wait used until [`GcodeSerial::with_ack_timeout`] is called
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Serial G-code sink
pub struct GcodeSerial {
    port: Mutex<Box<dyn SerialPortIO>>,
    device_path: String,
    ack_timeout: Duration,
    operational: AtomicBool,
}

impl std::fmt::Debug for GcodeSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcodeSerial")
            .field("device_path", &self.device_path)
            .field("ack_timeout", &self.ack_timeout)
            .field("operational", &self.operational.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl GcodeSerial {
    /// Open the first of `paths` that accepts a connection
    ///
    /// The sink is not operational until [`handshake`](Self::handshake)
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use etch_bridge::device::serial::GcodeSerial;
    /// use std::time::Duration;
    ///
    /// let serial = GcodeSerial::open(&["/dev/ttyUSB0"], 115200, Duration::from_millis(100))?;
    /// serial.handshake(Duration::from_secs(10))?;
    /// println!("Connected to: {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(paths: &[&str], baud_rate: u32, timeout: Duration) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match NativeSerialPort::open(path, baud_rate, timeout) {
                Ok(port) => {
                    info!("Opened motion controller at {} ({} baud)", path, baud_rate);
                    return Ok(Self::with_port(Box::new(port), path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(BridgeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Wrap an already-open port
    pub fn with_port(port: Box<dyn SerialPortIO>, device_path: &str) -> Self {
        Self {
            port: Mutex::new(port),
            device_path: device_path.to_string(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            operational: AtomicBool::new(false),
        }
    }

    /// Longest wait for `ok` after each line
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Resends `M110 N0` until the firmware acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns `Serial` when nothing answered within `timeout` or the port
    /// failed; the sink stays non-operational.
    pub fn handshake(&self, timeout: Duration) -> Result<()> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = port.discard_input() {
            debug!("Could not discard boot output: {}", e);
        }

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.operational.store(false, Ordering::Relaxed);
                return Err(BridgeError::Serial(format!(
                    "{} did not answer within {:?} ({} attempts)",
                    self.device_path, timeout, attempts
                )));
            }

            attempts += 1;
            let attempt = remaining.min(HANDSHAKE_RETRY).min(self.ack_timeout);
            match exchange(port.as_mut(), &[HANDSHAKE_COMMAND.to_string()], attempt) {
                Ok(()) => {
                    self.operational.store(true, Ordering::Relaxed);
                    info!("Motion controller at {} is ready", self.device_path);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!("No answer from {} yet (attempt {})", self.device_path, attempts);
                }
                Err(e) => {
                    self.operational.store(false, Ordering::Relaxed);
                    return Err(BridgeError::Serial(format!(
                        "Handshake with {} failed: {}",
                        self.device_path, e
                    )));
                }
            }
        }
    }
}

impl DeviceSink for GcodeSerial {
    fn send(&self, commands: &[String]) -> Result<()> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);

        match exchange(port.as_mut(), commands, self.ack_timeout) {
            Ok(()) => {
                self.operational.store(true, Ordering::Relaxed);
                debug!("Wrote {} G-code line(s) to {}", commands.len(), self.device_path);
                Ok(())
            }
            Err(e) => {
                self.operational.store(false, Ordering::Relaxed);
                // A late `ok` must not acknowledge the next line.
                if let Err(clear) = port.discard_input() {
                    debug!("Could not discard pending replies: {}", clear);
                }
                Err(BridgeError::Serial(format!(
                    "Failed to send to {}: {}",
                    self.device_path, e
                )))
            }
        }
    }

    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Relaxed)
    }
}

/// Writes each line and waits for its acknowledgement before the next.
fn exchange(port: &mut dyn SerialPortIO, commands: &[String], ack_timeout: Duration) -> io::Result<()> {
    for command in commands {
        port.write_all(format!("{}\n", command).as_bytes())?;
        port.flush()?;
        wait_for_ack(port, ack_timeout)?;
    }
    Ok(())
}

fn wait_for_ack(port: &mut dyn SerialPortIO, ack_timeout: Duration) -> io::Result<()> {
    let mut deadline = Instant::now() + ack_timeout;
    loop {
        match port.read_line() {
            Ok(line) if is_ack(&line) => return Ok(()),
            Ok(line) if line.starts_with("echo:busy") => {
                trace!("Device busy: {}", line);
                deadline = Instant::now() + ack_timeout;
            }
            Ok(line) if line.starts_with("Error") || line.starts_with("!!") => {
                warn!("Device reported: {}", line);
            }
            Ok(line) => debug!("Device: {}", line),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no acknowledgement within {:?}", ack_timeout),
            ));
        }
    }
}

fn is_ack(line: &str) -> bool {
    line == "ok" || line.starts_with("ok ")
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::MockSerialPort;
    use super::*;
    use std::io;

    fn sink_with_mock() -> (GcodeSerial, MockSerialPort) {
        let mock = MockSerialPort::new();
        let sink = GcodeSerial::with_port(Box::new(mock.clone()), "/dev/mock0")
            .with_ack_timeout(Duration::from_millis(30));
        (sink, mock)
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let err = GcodeSerial::open(invalid_paths, 115200, Duration::from_millis(100)).unwrap_err();

        match err {
            BridgeError::SerialPortNotFound(msg) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            other => panic!("Expected SerialPortNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        let result = GcodeSerial::open(empty_paths, 115200, Duration::from_millis(100));
        assert!(matches!(result, Err(BridgeError::SerialPortNotFound(_))));
    }

    #[test]
    fn test_send_writes_newline_terminated_lines() {
        let (sink, mock) = sink_with_mock();
        sink.send(&["G28 X Y".to_string(), "G28 Z".to_string()]).unwrap();

        assert_eq!(mock.written_text(), "G28 X Y\nG28 Z\n");
        assert!(sink.is_operational());
    }

    #[test]
    fn test_write_error_marks_not_operational() {
        let (sink, mock) = sink_with_mock();
        mock.set_write_error(Some(io::ErrorKind::BrokenPipe));

        let err = sink.send(&["G1 X1.00 Y1.00 F1000".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::Serial(msg) if msg.contains("/dev/mock0")));
        assert!(!sink.is_operational());
    }

    #[test]
    fn test_recovers_after_successful_write() {
        let (sink, mock) = sink_with_mock();
        mock.set_flush_error(Some(io::ErrorKind::TimedOut));
        assert!(sink.send(&["G28 Z".to_string()]).is_err());
        assert!(!sink.is_operational());

        mock.set_flush_error(None);
        sink.send(&["G28 Z".to_string()]).unwrap();
        assert!(sink.is_operational());
    }

    #[test]
    fn test_not_operational_until_handshake() {
        let (sink, mock) = sink_with_mock();
        assert!(!sink.is_operational());

        sink.handshake(Duration::from_millis(500)).unwrap();
        assert!(sink.is_operational());
        assert_eq!(mock.written_text(), "M110 N0\n");
    }

    #[test]
    fn test_handshake_retries_through_reset() {
        let (sink, mock) = sink_with_mock();
        // The bootloader swallows the first two lines.
        mock.set_lost_lines(2);
        mock.push_reply("start");

        sink.handshake(Duration::from_secs(2)).unwrap();
        assert!(sink.is_operational());
        assert_eq!(mock.written_text(), "M110 N0\n".repeat(3));
    }

    #[test]
    fn test_handshake_times_out() {
        let (sink, mock) = sink_with_mock();
        mock.set_auto_ack(false);

        let err = sink.handshake(Duration::from_millis(80)).unwrap_err();
        assert!(matches!(err, BridgeError::Serial(msg) if msg.contains("did not answer")));
        assert!(!sink.is_operational());
    }

    #[test]
    fn test_each_line_waits_for_ok() {
        let (sink, mock) = sink_with_mock();
        mock.set_auto_ack(false);
        mock.push_reply("ok");

        // Only the first line is acknowledged; the second is never answered.
        let err = sink
            .send(&["G28 X Y".to_string(), "G28 Z".to_string()])
            .unwrap_err();
        assert!(matches!(err, BridgeError::Serial(msg) if msg.contains("no acknowledgement")));
        assert_eq!(mock.written_text(), "G28 X Y\nG28 Z\n");
        assert!(!sink.is_operational());
    }

    #[test]
    fn test_line_not_sent_before_previous_ok() {
        let (sink, mock) = sink_with_mock();
        mock.set_auto_ack(false);

        assert!(sink
            .send(&["G28 X Y".to_string(), "G28 Z".to_string()])
            .is_err());
        assert_eq!(mock.written_text(), "G28 X Y\n");
    }

    #[test]
    fn test_other_replies_are_skipped() {
        let (sink, mock) = sink_with_mock();
        mock.set_auto_ack(false);
        for reply in ["echo:busy: processing", "T:21.3 /0.0", "Error:Unknown command", "ok T:21.3"] {
            mock.push_reply(reply);
        }

        sink.send(&["G1 X1.00 Y1.00 F1000".to_string()]).unwrap();
        assert!(sink.is_operational());
    }

    #[test]
    fn test_recovers_after_ack_timeout() {
        let (sink, mock) = sink_with_mock();
        sink.handshake(Duration::from_millis(500)).unwrap();

        mock.set_auto_ack(false);
        assert!(sink.send(&["G28 X Y".to_string()]).is_err());
        assert!(!sink.is_operational());

        mock.set_auto_ack(true);
        sink.send(&["G28 X Y".to_string()]).unwrap();
        assert!(sink.is_operational());
    }

    #[test]
    fn test_is_ack() {
        assert!(is_ack("ok"));
        assert!(is_ack("ok T:21.3 /0.0 B:20.1 /0.0"));
        assert!(!is_ack("okay"));
        assert!(!is_ack("echo:busy: processing"));
    }

    #[test]
    fn test_device_path() {
        let (sink, _) = sink_with_mock();
        assert_eq!(sink.device_path(), "/dev/mock0");
    }

    // Integration test - only runs if a motion controller is connected
    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn test_home_with_real_hardware() {
        match GcodeSerial::open(&["/dev/ttyUSB0", "/dev/ttyACM0"], 115200, Duration::from_millis(100)) {
            Ok(serial) => {
                serial.handshake(Duration::from_secs(10)).expect("no answer");
                serial.send(&["G28 X Y".to_string()]).expect("send failed");
                println!("Homed via {}", serial.device_path());
            }
            Err(_) => println!("No motion controller detected (skipping)"),
        }
    }
}
