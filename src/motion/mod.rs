//! # Motion Module
//!
//! Everything between a normalized movement vector and a device command:
//! position tracking, bounds, the arbiter and the G-code it emits.

pub mod arbiter;
pub mod gcode;
pub mod position;
pub mod shake;
