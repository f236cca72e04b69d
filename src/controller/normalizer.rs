//! # Input Normalizer Module
//!
//! Converts raw evdev events from a dual-stick gamepad into a stable,
//! normalized [`ControllerState`].
//!
//! ## Axis Codes (EV_ABS)
//!
//! | Axis | evdev Code | Raw Range | Field |
//! |------|------------|-----------|-------|
//! | Left Stick X | ABS_X | -32768..32767 | `left_x` (plotter X) |
//! | Left Stick Y | ABS_Y | -32768..32767 | `left_y` |
//! | Right Stick X | ABS_RX | -32768..32767 | `right_x` |
//! | Right Stick Y | ABS_RY | -32768..32767 | `right_y` (plotter Y) |
//! | Left Trigger | ABS_Z | 0..1023 | `left_trigger` |
//! | Right Trigger | ABS_RZ | 0..1023 | `right_trigger` |
//!
//! ## Button Codes (EV_KEY)
//!
//! | Button | evdev Code | Action |
//! |--------|------------|--------|
//! | A | BTN_SOUTH | Toggle pen height |
//! | B | BTN_EAST | Home X/Y |
//! | X | BTN_WEST | - |
//! | Y | BTN_NORTH | Shake-clear |
//! | Back | BTN_SELECT | - |
//! | Start | BTN_START | - |
//! | LB / RB | BTN_TL / BTN_TR | - |
//! | L3 / R3 | BTN_THUMBL / BTN_THUMBR | - |
//!
//! ## Filtering
//!
//! Stick samples are divided by 2^15. Magnitudes below the movement
//! threshold snap to exactly `0.0`. A filtered value is only committed when
//! it differs from the previously committed value by more than the
//! significance margin; a commit raises the `has_new_movement` flag.
//!
//! ## Usage
//!
//! ```
//! use etch_bridge::controller::normalizer::Normalizer;
//! use evdev::{AbsoluteAxisType, EventType, InputEvent};
//!
//! let mut normalizer = Normalizer::new(0.15, 0.01);
//! let event = InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, 16384);
//! normalizer.process_event(&event)?;
//! assert_eq!(normalizer.movement().left_x, 0.5);
//! # Ok::<(), etch_bridge::error::BridgeError>(())
//! ```

use evdev::{AbsoluteAxisType, InputEvent, InputEventKind, Key};
use tracing::{debug, info, trace, warn};

use crate::error::{BridgeError, Result};

/// Magnitude used to normalize stick samples (2^15).
pub const AXIS_MAX_MAGNITUDE: f32 = 32768.0;

/// Full-scale raw trigger value.
pub const TRIGGER_MAX: f32 = 1023.0;

/// Raw key state reported for a pressed button.
pub const BUTTON_PRESSED: i32 = 1;

/// Normalized snapshot of the gamepad.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerState {
    // Sticks (-1.0..=1.0, 0.0 = centered or inside the deadzone)
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,

    // Triggers (0.0..=1.0)
    pub left_trigger: f32,
    pub right_trigger: f32,

    // Face buttons
    pub btn_a: bool,
    pub btn_b: bool,
    pub btn_x: bool,
    pub btn_y: bool,

    // System buttons
    pub btn_start: bool,
    pub btn_back: bool,

    // Shoulders and stick clicks
    pub left_bumper: bool,
    pub right_bumper: bool,
    pub left_thumb: bool,
    pub right_thumb: bool,

    /// Set whenever a stick value is committed.
    pub has_new_movement: bool,
}

/// Read-only projection of the four stick axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Movement {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
}

#[derive(Debug, Clone, Copy)]
enum Stick {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl Stick {
    fn name(self) -> &'static str {
        match self {
            Stick::LeftX => "left_x",
            Stick::LeftY => "left_y",
            Stick::RightX => "right_x",
            Stick::RightY => "right_y",
        }
    }
}

/// Stateful event filter owned by the input-reading context.
///
/// `Normalizer` is not thread-safe. Use from a single task/thread only.
#[derive(Debug)]
pub struct Normalizer {
    state: ControllerState,
    movement_threshold: f32,
    significance: f32,
    debug_mode: bool,
}

impl Normalizer {
    #[must_use]
    pub fn new(movement_threshold: f32, significance: f32) -> Self {
        Self {
            state: ControllerState::default(),
            movement_threshold,
            significance,
            debug_mode: false,
        }
    }

    /// Log every raw event at `info` instead of `trace`.
    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.debug_mode = enabled;
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn movement_threshold(&self) -> f32 {
        self.movement_threshold
    }

    #[must_use]
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Stick values with the threshold re-applied.
    ///
    /// Values whose magnitude does not exceed the threshold are reported as
    /// `0.0`, so a value sitting exactly on the threshold is never a move.
    #[must_use]
    pub fn movement(&self) -> Movement {
        let gate = |v: f32| if v.abs() > self.movement_threshold { v } else { 0.0 };
        Movement {
            left_x: gate(self.state.left_x),
            left_y: gate(self.state.left_y),
            right_x: gate(self.state.right_x),
            right_y: gate(self.state.right_y),
        }
    }

    /// Clears the `has_new_movement` flag, returning its previous value.
    pub fn take_new_movement(&mut self) -> bool {
        std::mem::take(&mut self.state.has_new_movement)
    }

    /// Processes a single evdev event.
    ///
    /// Unknown event types and codes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AxisOutOfRange` when a sample normalizes outside its range;
    /// the committed state is left untouched.
    pub fn process_event(&mut self, event: &InputEvent) -> Result<()> {
        if self.debug_mode {
            info!(
                "Raw controller event - type: {:?}, code: {}, state: {}",
                event.event_type(),
                event.code(),
                event.value()
            );
        } else {
            trace!(
                "Raw controller event - type: {:?}, code: {}, state: {}",
                event.event_type(),
                event.code(),
                event.value()
            );
        }

        match event.kind() {
            InputEventKind::AbsAxis(axis) => self.process_axis_event(axis, event.value()),
            InputEventKind::Key(key) => {
                self.process_key_event(key, event.value());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Processes a batch, logging and skipping events that fail.
    ///
    /// Returns the number of events that were rejected.
    pub fn process_batch<'a, I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a InputEvent>,
    {
        let mut rejected = 0;
        for event in events {
            if let Err(e) = self.process_event(event) {
                warn!("Error processing controller event: {}", e);
                rejected += 1;
            }
        }
        rejected
    }

    fn process_axis_event(&mut self, axis: AbsoluteAxisType, raw: i32) -> Result<()> {
        match axis {
            AbsoluteAxisType::ABS_X => self.commit_stick(Stick::LeftX, raw),
            AbsoluteAxisType::ABS_Y => self.commit_stick(Stick::LeftY, raw),
            AbsoluteAxisType::ABS_RX => self.commit_stick(Stick::RightX, raw),
            AbsoluteAxisType::ABS_RY => self.commit_stick(Stick::RightY, raw),
            AbsoluteAxisType::ABS_Z => {
                self.state.left_trigger = normalize_trigger("left_trigger", raw)?;
                Ok(())
            }
            AbsoluteAxisType::ABS_RZ => {
                self.state.right_trigger = normalize_trigger("right_trigger", raw)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn commit_stick(&mut self, stick: Stick, raw: i32) -> Result<()> {
        let normalized = normalize_stick(stick.name(), raw)?;
        let filtered = if normalized.abs() < self.movement_threshold {
            0.0
        } else {
            normalized
        };

        let significance = self.significance;
        let slot = self.stick_mut(stick);
        if (filtered - *slot).abs() > significance {
            *slot = filtered;
            self.state.has_new_movement = true;
            debug!("{} updated: {:.3}", stick.name(), filtered);
        }
        Ok(())
    }

    fn stick_mut(&mut self, stick: Stick) -> &mut f32 {
        match stick {
            Stick::LeftX => &mut self.state.left_x,
            Stick::LeftY => &mut self.state.left_y,
            Stick::RightX => &mut self.state.right_x,
            Stick::RightY => &mut self.state.right_y,
        }
    }

    fn process_key_event(&mut self, key: Key, raw: i32) {
        let pressed = raw == BUTTON_PRESSED;
        match key {
            Key::BTN_SOUTH => self.state.btn_a = pressed,
            Key::BTN_EAST => self.state.btn_b = pressed,
            Key::BTN_WEST => self.state.btn_x = pressed,
            Key::BTN_NORTH => self.state.btn_y = pressed,
            Key::BTN_START => self.state.btn_start = pressed,
            Key::BTN_SELECT => self.state.btn_back = pressed,
            Key::BTN_TL => self.state.left_bumper = pressed,
            Key::BTN_TR => self.state.right_bumper = pressed,
            Key::BTN_THUMBL => self.state.left_thumb = pressed,
            Key::BTN_THUMBR => self.state.right_thumb = pressed,
            _ => {}
        }
    }
}

/// Normalizes a raw stick sample to `-1.0..=1.0`.
///
/// # Errors
///
/// Returns `AxisOutOfRange` if the magnitude exceeds 2^15.
pub fn normalize_stick(axis: &'static str, raw: i32) -> Result<f32> {
    let normalized = raw as f32 / AXIS_MAX_MAGNITUDE;
    if normalized.abs() > 1.0 {
        return Err(BridgeError::AxisOutOfRange { axis, value: raw });
    }
    Ok(normalized)
}

fn normalize_trigger(axis: &'static str, raw: i32) -> Result<f32> {
    let normalized = raw as f32 / TRIGGER_MAX;
    if !(0.0..=1.0).contains(&normalized) {
        return Err(BridgeError::AxisOutOfRange { axis, value: raw });
    }
    Ok(normalized)
}
