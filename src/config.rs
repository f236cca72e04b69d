//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::controller::buttons::ButtonMode;
use crate::error::{BridgeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration for the motion controller
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Longest wait for the firmware's `ok` after one line
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Longest wait for the firmware to answer after the port opens
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// Controller input configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Controller to activate at startup (empty = wait for an activate command)
    #[serde(default)]
    pub device_id: String,

    #[serde(default = "default_movement_threshold")]
    pub movement_threshold: f32,

    #[serde(default = "default_significance")]
    pub significance: f32,

    #[serde(default)]
    pub button_mode: ButtonMode,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

/// Motion mapping configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MotionConfig {
    #[serde(default = "default_sensitivity_gain")]
    pub sensitivity_gain: f64,

    #[serde(default = "default_movement_interval_ms")]
    pub movement_interval_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_feedrate")]
    pub feedrate: u32,

    #[serde(default = "default_z_feedrate")]
    pub z_feedrate: u32,

    #[serde(default = "default_shake_feedrate")]
    pub shake_feedrate: u32,

    #[serde(default = "default_z_drawing")]
    pub z_drawing: f64,

    #[serde(default = "default_z_travel")]
    pub z_travel: f64,

    #[serde(default = "default_shake_inset")]
    pub shake_inset: f64,

    #[serde(default = "default_shake_repetitions")]
    pub shake_repetitions: u32,

    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,
}

/// Session supervision configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_final_join_timeout_ms")]
    pub final_join_timeout_ms: u64,
}

/// Printer profile configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PrinterConfig {
    /// JSON printer profile re-read on every bounds refresh
    #[serde(default)]
    pub profile_path: Option<String>,

    #[serde(default = "default_dimension")]
    pub width: f64,

    #[serde(default = "default_dimension")]
    pub depth: f64,

    #[serde(default = "default_origin")]
    pub origin: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files (console only when unset)
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 100 }
fn default_ack_timeout_ms() -> u64 { 10000 }
fn default_handshake_timeout_ms() -> u64 { 10000 }

fn default_movement_threshold() -> f32 { 0.15 }
fn default_significance() -> f32 { 0.01 }
fn default_refresh_interval_ms() -> u64 { 5000 }

fn default_sensitivity_gain() -> f64 { 1.5 }
fn default_movement_interval_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 5 }
fn default_feedrate() -> u32 { 1000 }
fn default_z_feedrate() -> u32 { 1000 }
fn default_shake_feedrate() -> u32 { 3000 }
fn default_z_drawing() -> f64 { 0.2 }
fn default_z_travel() -> f64 { 1.0 }
fn default_shake_inset() -> f64 { 5.0 }
fn default_shake_repetitions() -> u32 { 4 }
fn default_command_delay_ms() -> u64 { 50 }

fn default_max_errors() -> u32 { 10 }
fn default_shutdown_timeout_ms() -> u64 { 3000 }
fn default_final_join_timeout_ms() -> u64 { 1000 }

fn default_dimension() -> f64 { 200.0 }
fn default_origin() -> String { "lowerleft".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            movement_threshold: default_movement_threshold(),
            significance: default_significance(),
            button_mode: ButtonMode::default(),
            debug_mode: false,
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity_gain: default_sensitivity_gain(),
            movement_interval_ms: default_movement_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            feedrate: default_feedrate(),
            z_feedrate: default_z_feedrate(),
            shake_feedrate: default_shake_feedrate(),
            z_drawing: default_z_drawing(),
            z_travel: default_z_travel(),
            shake_inset: default_shake_inset(),
            shake_repetitions: default_shake_repetitions(),
            command_delay_ms: default_command_delay_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            final_join_timeout_ms: default_final_join_timeout_ms(),
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            profile_path: None,
            width: default_dimension(),
            depth: default_dimension(),
            origin: default_origin(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl SerialConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl MotionConfig {
    pub fn movement_interval(&self) -> Duration {
        Duration::from_millis(self.movement_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

impl SessionConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn final_join_timeout(&self) -> Duration {
        Duration::from_millis(self.final_join_timeout_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use etch_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.ack_timeout_ms < self.serial.timeout_ms {
            return Err(invalid("ack_timeout_ms cannot be shorter than timeout_ms"));
        }

        if self.serial.handshake_timeout_ms == 0 {
            return Err(invalid("handshake_timeout_ms must be greater than 0"));
        }

        if ![9600, 57600, 115200, 250000, 500000, 1000000].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 57600, 115200, 250000, 500000, 1000000",
            ));
        }

        if !(0.0..=0.5).contains(&self.controller.movement_threshold) {
            return Err(invalid("movement_threshold must be between 0.0 and 0.5"));
        }

        if !(0.0..=0.1).contains(&self.controller.significance) {
            return Err(invalid("significance must be between 0.0 and 0.1"));
        }

        if !(self.motion.sensitivity_gain > 0.0 && self.motion.sensitivity_gain.is_finite()) {
            return Err(invalid("sensitivity_gain must be a positive number"));
        }

        if self.motion.movement_interval_ms == 0 || self.motion.movement_interval_ms > 5000 {
            return Err(invalid("movement_interval_ms must be between 1 and 5000"));
        }

        if self.motion.poll_interval_ms == 0 || self.motion.poll_interval_ms > 50 {
            return Err(invalid("poll_interval_ms must be between 1 and 50"));
        }

        for (name, value) in [
            ("feedrate", self.motion.feedrate),
            ("z_feedrate", self.motion.z_feedrate),
            ("shake_feedrate", self.motion.shake_feedrate),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.motion.z_drawing < 0.0 || self.motion.z_travel < self.motion.z_drawing {
            return Err(invalid("z heights must satisfy 0 <= z_drawing <= z_travel"));
        }

        if self.motion.shake_inset < 0.0 {
            return Err(invalid("shake_inset cannot be negative"));
        }

        if self.motion.shake_repetitions == 0 || self.motion.shake_repetitions > 20 {
            return Err(invalid("shake_repetitions must be between 1 and 20"));
        }

        if self.motion.command_delay_ms > 1000 {
            return Err(invalid("command_delay_ms must be at most 1000"));
        }

        if self.session.max_errors == 0 {
            return Err(invalid("max_errors must be greater than 0"));
        }

        if self.session.shutdown_timeout_ms == 0 || self.session.shutdown_timeout_ms > 60000 {
            return Err(invalid("shutdown_timeout_ms must be between 1 and 60000"));
        }

        if self.session.final_join_timeout_ms > 60000 {
            return Err(invalid("final_join_timeout_ms must be at most 60000"));
        }

        if self.printer.width <= 0.0 || self.printer.depth <= 0.0 {
            return Err(invalid("printer width and depth must be greater than 0"));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(format!("unknown log level '{}'", self.logging.level)));
        }

        Ok(())
    }
}
