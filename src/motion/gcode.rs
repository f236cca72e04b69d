//! # Motion Command Module
//!
//! Typed commands understood by the motion controller, rendered as G-code.
//!
//! | Command | G-code |
//! |---------|--------|
//! | `MoveXY` | `G1 X<x> Y<y> F<feedrate>` |
//! | `MoveZ` | `G1 Z<z> F<feedrate>` |
//! | `HomeXY` | `G28 X Y` |
//! | `HomeZ` | `G28 Z` |
//!
//! Coordinates are absolute millimetres printed with two decimals.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Linear move of the drawing head to an absolute X/Y.
    MoveXY { x: f64, y: f64, feedrate: u32 },
    /// Pen height move.
    MoveZ { z: f64, feedrate: u32 },
    /// Home the X and Y axes.
    HomeXY,
    /// Home the Z axis.
    HomeZ,
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCommand::MoveXY { x, y, feedrate } => {
                write!(f, "G1 X{:.2} Y{:.2} F{}", x, y, feedrate)
            }
            MotionCommand::MoveZ { z, feedrate } => write!(f, "G1 Z{:.2} F{}", z, feedrate),
            MotionCommand::HomeXY => f.write_str("G28 X Y"),
            MotionCommand::HomeZ => f.write_str("G28 Z"),
        }
    }
}

impl MotionCommand {
    pub fn to_gcode(&self) -> String {
        self.to_string()
    }
}
