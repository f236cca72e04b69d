//! # Gamepad Discovery Module
//!
//! Enumerates attached gamepads and reads their events through the Linux
//! evdev interface.
//!
//! ## Controller Detection
//!
//! An `/dev/input/event*` device is treated as a gamepad when it reports
//! the `BTN_SOUTH` key and both the `ABS_X` and `ABS_RY` axes. The device
//! path doubles as the controller id; the evdev name is the display name.
//!
//! ## Reading
//!
//! Devices are switched to non-blocking mode after opening so that a read
//! with nothing pending returns an empty batch instead of parking the
//! control loop.

use evdev::{AbsoluteAxisType, Device, InputEvent, Key};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// A controller offered to the user for activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub id: String,
    pub name: String,
}

/// Source of controller event batches.
pub trait InputSource: Send {
    /// Reads all pending events. An empty batch means "no change".
    ///
    /// # Errors
    ///
    /// Returns `Controller` if the device can no longer be read.
    fn read_batch(&mut self) -> Result<Vec<InputEvent>>;
}

/// Enumerates controllers and opens them for reading.
#[cfg_attr(test, mockall::automock)]
pub trait ControllerScanner: Send + Sync {
    /// Fresh enumeration of attached controllers.
    fn list(&self) -> Result<Vec<ControllerInfo>>;

    /// Opens the controller with the given id.
    fn open(&self, id: &str) -> Result<Box<dyn InputSource>>;
}

/// evdev-backed gamepad handle.
pub struct EvdevGamepad {
    device: Device,
    device_path: String,
}

impl std::fmt::Debug for EvdevGamepad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvdevGamepad")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl EvdevGamepad {
    /// Opens a gamepad by device path and switches it to non-blocking reads.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: the path cannot be opened
    /// - `Controller`: the device is not a gamepad or cannot be configured
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use etch_bridge::controller::gamepad::EvdevGamepad;
    ///
    /// let pad = EvdevGamepad::open("/dev/input/event5")?;
    /// println!("Opened {}", pad.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let device = Device::open(path)
            .map_err(|e| BridgeError::ControllerNotFound(format!("{}: {}", path.display(), e)))?;

        if !is_gamepad(&device) {
            return Err(BridgeError::Controller(format!(
                "{} is not a gamepad",
                path.display()
            )));
        }

        set_nonblocking(&device).map_err(|e| {
            BridgeError::Controller(format!(
                "Failed to set {} non-blocking: {}",
                path.display(),
                e
            ))
        })?;

        let device_path = path.to_string_lossy().to_string();
        info!(
            "Opened controller {} ({})",
            device.name().unwrap_or("unnamed"),
            device_path
        );

        Ok(Self {
            device,
            device_path,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl InputSource for EvdevGamepad {
    fn read_batch(&mut self) -> Result<Vec<InputEvent>> {
        match self.device.fetch_events() {
            Ok(events) => Ok(events.collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(BridgeError::Controller(format!(
                "Failed to fetch events from {}: {}",
                self.device_path, e
            ))),
        }
    }
}

/// Scans `/dev/input` for gamepads.
#[derive(Debug, Clone)]
pub struct EvdevScanner {
    input_dir: PathBuf,
}

impl Default for EvdevScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl EvdevScanner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            input_dir: PathBuf::from("/dev/input"),
        }
    }

    /// Scanner rooted at a different directory of event nodes.
    #[must_use]
    pub fn with_input_dir<P: Into<PathBuf>>(input_dir: P) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }
}

impl ControllerScanner for EvdevScanner {
    fn list(&self) -> Result<Vec<ControllerInfo>> {
        if !self.input_dir.exists() {
            return Err(BridgeError::Controller(format!(
                "{} directory not found",
                self.input_dir.display()
            )));
        }

        let mut entries: Vec<_> = std::fs::read_dir(&self.input_dir)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Deterministic ordering across refreshes
        entries.sort_by_key(|entry| entry.path());

        let mut controllers = Vec::new();
        for entry in entries {
            let path = entry.path();
            let is_event_node = path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with("event"))
                .unwrap_or(false);
            if !is_event_node {
                continue;
            }

            match Device::open(&path) {
                Ok(device) if is_gamepad(&device) => {
                    let name = device.name().unwrap_or("Unknown controller").to_string();
                    debug!("Found controller: {} ({})", name, path.display());
                    controllers.push(ControllerInfo {
                        id: path.to_string_lossy().to_string(),
                        name,
                    });
                }
                Ok(_) => debug!("Skipping non-gamepad device {}", path.display()),
                Err(e) => debug!("Could not open {}: {}", path.display(), e),
            }
        }

        debug!(
            "Scanned {} for gamepads: {} found",
            self.input_dir.display(),
            controllers.len()
        );
        Ok(controllers)
    }

    fn open(&self, id: &str) -> Result<Box<dyn InputSource>> {
        Ok(Box::new(EvdevGamepad::open(id)?))
    }
}

fn is_gamepad(device: &Device) -> bool {
    let has_buttons = device
        .supported_keys()
        .map(|keys| keys.contains(Key::BTN_SOUTH))
        .unwrap_or(false);
    let has_sticks = device
        .supported_absolute_axes()
        .map(|axes| axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_RY))
        .unwrap_or(false);
    has_buttons && has_sticks
}

fn set_nonblocking<F: AsRawFd>(file: &F) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
