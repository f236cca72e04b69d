//! # Device Module
//!
//! The motion controller seen from the control core.
//!
//! This module handles:
//! - The [`DeviceSink`] contract: command batches plus an operational
//!   check; pacing against the device is the sink's business
//! - [`CommandSender`]: the single send path used by the core, adding
//!   logging, dry-run suppression and the post-send settle delay
//! - Printer profile lookup for axis bounds ([`profile`])
//! - A serial G-code implementation of the sink ([`serial`])

pub mod profile;
pub mod serial;

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::Result;
use crate::motion::gcode::MotionCommand;

/// Accepts device command batches.
///
/// Implementations must tolerate being called repeatedly with the same
/// command.
pub trait DeviceSink: Send + Sync {
    /// Sends one batch of G-code lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be handed to the device.
    fn send(&self, commands: &[String]) -> Result<()>;

    /// Whether the device is ready to accept motion.
    fn is_operational(&self) -> bool;
}

/// Send path shared by activation and the control loop.
#[derive(Clone)]
pub struct CommandSender {
    sink: Arc<dyn DeviceSink>,
    dry_run: bool,
    settle_delay: Duration,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("dry_run", &self.dry_run)
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

impl CommandSender {
    #[must_use]
    pub fn new(sink: Arc<dyn DeviceSink>, settle_delay: Duration) -> Self {
        Self {
            sink,
            dry_run: false,
            settle_delay,
        }
    }

    /// Log commands without delivering them.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_operational(&self) -> bool {
        self.sink.is_operational()
    }

    /// Sends a batch and waits the settle delay.
    ///
    /// # Errors
    ///
    /// Failures are logged and returned to the caller unchanged.
    pub fn send(&self, commands: &[MotionCommand]) -> Result<()> {
        if self.deliver(commands)? {
            std::thread::sleep(self.settle_delay);
        }
        Ok(())
    }

    /// Sends a batch without the settle delay (stick-driven moves).
    ///
    /// # Errors
    ///
    /// Failures are logged and returned to the caller unchanged.
    pub fn send_immediate(&self, commands: &[MotionCommand]) -> Result<()> {
        self.deliver(commands).map(|_| ())
    }

    /// Returns whether anything was handed to the sink.
    fn deliver(&self, commands: &[MotionCommand]) -> Result<bool> {
        if commands.is_empty() {
            return Ok(false);
        }
        let lines: Vec<String> = commands.iter().map(MotionCommand::to_gcode).collect();

        if self.dry_run {
            info!("Dry run, not sending G-code: {:?}", lines);
            return Ok(false);
        }

        info!("Sending G-code: {:?}", lines);
        self.sink.send(&lines).map_err(|e| {
            error!("Error sending G-code {:?}: {}", lines, e);
            e
        })?;
        Ok(true)
    }
}
