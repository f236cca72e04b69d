//! # Controller Module
//!
//! Gamepad input handling.
//!
//! This module handles:
//! - Gamepad discovery and non-blocking event reads via evdev
//! - Normalizing stick samples with deadzone and significance filtering
//! - Turning held buttons into edge- or level-triggered actions

pub mod buttons;
pub mod gamepad;
pub mod normalizer;
