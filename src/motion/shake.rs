//! # Shake-Clear Module
//!
//! The corner-to-corner travel pattern that stands in for shaking the
//! drawing surface clean.
//!
//! The pattern is a flat list of discrete steps so the executor can check
//! for cancellation between sub-moves:
//!
//! 1. Lift the pen to travel height
//! 2. `repetitions` x zigzag over the four inset corners:
//!    `(i, i)`, `(max_x - i, max_y - i)`, `(max_x - i, i)`, `(i, max_y - i)`
//! 3. Home X/Y

use super::gcode::MotionCommand;
use super::position::Bounds;

/// Parameters of the pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShakeSettings {
    pub inset: f64,
    pub repetitions: u32,
    pub feedrate: u32,
    pub z_travel: f64,
    pub z_feedrate: u32,
}

/// One discrete sub-move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShakeStep {
    LiftPen { z: f64, feedrate: u32 },
    Corner { x: f64, y: f64, feedrate: u32 },
    Home,
}

impl ShakeStep {
    pub fn command(&self) -> MotionCommand {
        match *self {
            ShakeStep::LiftPen { z, feedrate } => MotionCommand::MoveZ { z, feedrate },
            ShakeStep::Corner { x, y, feedrate } => MotionCommand::MoveXY { x, y, feedrate },
            ShakeStep::Home => MotionCommand::HomeXY,
        }
    }
}

/// The four zigzag corners, inset from the bounds.
///
/// The inset is limited to half of each dimension so corners never leave
/// the bed on very small profiles.
pub fn zigzag_corners(bounds: Bounds, inset: f64) -> [(f64, f64); 4] {
    let ix = inset.min(bounds.max_x / 2.0);
    let iy = inset.min(bounds.max_y / 2.0);
    let far_x = bounds.max_x - ix;
    let far_y = bounds.max_y - iy;
    [(ix, iy), (far_x, far_y), (far_x, iy), (ix, far_y)]
}

/// Full step list for one shake-clear.
pub fn plan(bounds: Bounds, settings: &ShakeSettings) -> Vec<ShakeStep> {
    let corners = zigzag_corners(bounds, settings.inset);
    let mut steps = Vec::with_capacity(2 + corners.len() * settings.repetitions as usize);

    steps.push(ShakeStep::LiftPen {
        z: settings.z_travel,
        feedrate: settings.z_feedrate,
    });
    for _ in 0..settings.repetitions {
        steps.extend(corners.iter().map(|&(x, y)| ShakeStep::Corner {
            x,
            y,
            feedrate: settings.feedrate,
        }));
    }
    steps.push(ShakeStep::Home);
    steps
}
