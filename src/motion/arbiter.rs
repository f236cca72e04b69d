//! # Motion Arbiter
//!
//! Turns normalized stick movement into bounded, rate-limited device moves
//! and executes the button actions.
//!
//! ## Axis Mapping
//!
//! | Stick | Device axis |
//! |-------|-------------|
//! | Left X | X |
//! | Right Y | Y |
//!
//! The split across both sticks mirrors the two knobs of the toy.
//!
//! ## Per-axis Step
//!
//! 1. Skip unless `|value| > movement_threshold`
//! 2. `target = clamp(current + value * sensitivity_gain, 0, max)`
//! 3. If `target != current` (exact), commit under the position lock and
//!    send `G1 X.. Y.. F..`
//!
//! Steps only run once `movement_interval` has elapsed since the last move
//! that actually happened.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::gcode::MotionCommand;
use super::position::SharedPosition;
use super::shake::{self, ShakeSettings, ShakeStep};
use crate::clock::Clock;
use crate::config::{ControllerConfig, MotionConfig};
use crate::controller::buttons::ActionButton;
use crate::controller::normalizer::Movement;
use crate::device::CommandSender;
use crate::error::Result;

/// Tunables of the arbiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbiterSettings {
    pub movement_threshold: f32,
    pub sensitivity_gain: f64,
    pub movement_interval: Duration,
    pub feedrate: u32,
    pub z_feedrate: u32,
    pub shake: ShakeSettings,
}

impl ArbiterSettings {
    pub fn from_config(controller: &ControllerConfig, motion: &MotionConfig) -> Self {
        Self {
            movement_threshold: controller.movement_threshold,
            sensitivity_gain: motion.sensitivity_gain,
            movement_interval: motion.movement_interval(),
            feedrate: motion.feedrate,
            z_feedrate: motion.z_feedrate,
            shake: ShakeSettings {
                inset: motion.shake_inset,
                repetitions: motion.shake_repetitions,
                feedrate: motion.shake_feedrate,
                z_travel: motion.z_travel,
                z_feedrate: motion.z_feedrate,
            },
        }
    }
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default(), &MotionConfig::default())
    }
}

/// How a shake-clear ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShakeOutcome {
    Completed,
    /// Stop was requested after `steps_sent` sub-moves.
    Interrupted { steps_sent: usize },
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Owns the motion side of a session.
pub struct MotionArbiter<C: Clock> {
    position: SharedPosition,
    sender: CommandSender,
    settings: ArbiterSettings,
    clock: C,
    last_movement: Instant,
}

impl<C: Clock> MotionArbiter<C> {
    /// The cadence window starts at construction.
    pub fn new(position: SharedPosition, sender: CommandSender, settings: ArbiterSettings, clock: C) -> Self {
        let last_movement = clock.now();
        Self {
            position,
            sender,
            settings,
            clock,
            last_movement,
        }
    }

    pub fn position(&self) -> &SharedPosition {
        &self.position
    }

    pub fn settings(&self) -> &ArbiterSettings {
        &self.settings
    }

    /// Whether a movement step may run now.
    pub fn cadence_elapsed(&self) -> bool {
        self.clock.since(self.last_movement) >= self.settings.movement_interval
    }

    /// Runs [`step`](Self::step) if the cadence interval has elapsed.
    ///
    /// # Errors
    ///
    /// Propagates the first failed move send.
    pub fn step_if_due(&mut self, movement: &Movement) -> Result<usize> {
        if !self.cadence_elapsed() {
            return Ok(0);
        }
        self.step(movement)
    }

    /// Applies one movement vector, returning the number of moves sent.
    ///
    /// Each axis is evaluated independently and emits at most one move. A
    /// failed send on X does not prevent Y from being evaluated; the first
    /// error is returned after both axes ran.
    ///
    /// # Errors
    ///
    /// Propagates the first failed move send.
    pub fn step(&mut self, movement: &Movement) -> Result<usize> {
        let mut sent = 0;
        let mut first_error = None;

        for (axis, value) in [(Axis::X, movement.left_x), (Axis::Y, movement.right_y)] {
            match self.step_axis(axis, value) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    /// Returns whether the axis moved.
    fn step_axis(&mut self, axis: Axis, value: f32) -> Result<bool> {
        if value.abs() <= self.settings.movement_threshold {
            return Ok(false);
        }
        let delta = f64::from(value) * self.settings.sensitivity_gain;

        let mut position = self.position.lock();
        let (current, target) = match axis {
            Axis::X => (position.x, position.clamp_x(position.x + delta)),
            Axis::Y => (position.y, position.clamp_y(position.y + delta)),
        };
        if target == current {
            return Ok(false);
        }

        match axis {
            Axis::X => position.x = target,
            Axis::Y => position.y = target,
        }
        self.last_movement = self.clock.now();
        info!("Moving {:?} to: {:.2}", axis, target);

        let command = MotionCommand::MoveXY {
            x: position.x,
            y: position.y,
            feedrate: self.settings.feedrate,
        };
        self.sender.send_immediate(&[command])?;
        Ok(true)
    }

    /// Dispatches one fired button.
    ///
    /// # Errors
    ///
    /// Propagates send failures of the action.
    pub fn handle_button<F>(&mut self, button: ActionButton, should_stop: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        match button {
            ActionButton::A => self.toggle_pen(),
            ActionButton::B => self.home(),
            ActionButton::Y => self.shake_clear(should_stop).map(|_| ()),
        }
    }

    /// Flips the drawing flag and moves Z to the matching height.
    ///
    /// # Errors
    ///
    /// Propagates the send failure; the flag stays flipped.
    pub fn toggle_pen(&mut self) -> Result<()> {
        let command = {
            let mut position = self.position.lock();
            position.drawing = !position.drawing;
            MotionCommand::MoveZ {
                z: position.pen_height(),
                feedrate: self.settings.z_feedrate,
            }
        };
        info!("Sending Z movement: {}", command);
        self.sender.send(&[command])
    }

    /// Homes X/Y, then records (0, 0).
    ///
    /// The home is sent even when the tracked position is already the
    /// origin.
    ///
    /// # Errors
    ///
    /// Propagates the send failure; the tracked position is left as it was.
    pub fn home(&mut self) -> Result<()> {
        info!("Homing XY");
        self.sender.send(&[MotionCommand::HomeXY])?;
        self.position.lock().reset_to_origin();
        Ok(())
    }

    /// Runs the shake-clear pattern, checking `should_stop` between
    /// sub-moves.
    ///
    /// Tracked position follows each commanded corner. An interrupted run
    /// leaves it at the last corner sent and does not home.
    ///
    /// # Errors
    ///
    /// Aborts on the first failed sub-move.
    pub fn shake_clear<F>(&mut self, should_stop: F) -> Result<ShakeOutcome>
    where
        F: Fn() -> bool,
    {
        info!("Initiating shake clear");
        let bounds = self.position.lock().bounds;
        let steps = shake::plan(bounds, &self.settings.shake);

        for (sent, step) in steps.iter().enumerate() {
            if should_stop() {
                warn!("Shake clear interrupted after {} of {} moves", sent, steps.len());
                return Ok(ShakeOutcome::Interrupted { steps_sent: sent });
            }

            match *step {
                ShakeStep::LiftPen { .. } => self.position.lock().drawing = false,
                ShakeStep::Corner { x, y, .. } => self.position.lock().move_to(x, y),
                ShakeStep::Home => {}
            }
            self.sender.send(&[step.command()])?;
            if *step == ShakeStep::Home {
                self.position.lock().reset_to_origin();
            }
        }

        info!("Shake clear complete");
        Ok(ShakeOutcome::Completed)
    }
}
