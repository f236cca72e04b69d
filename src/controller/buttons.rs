//! # Button Trigger Module
//!
//! Turns level button states from [`ControllerState`] into action triggers.
//!
//! The normalizer only records whether a button is currently held. Whether
//! a held button fires its action once (edge) or on every loop iteration
//! (level) is decided here.

use serde::Deserialize;

use super::normalizer::ControllerState;

/// Buttons that drive plotter actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionButton {
    /// A (BTN_SOUTH): toggle pen height.
    A,
    /// B (BTN_EAST): home X/Y.
    B,
    /// Y (BTN_NORTH): shake-clear.
    Y,
}

impl ActionButton {
    /// Evaluation order within one loop iteration.
    pub const ALL: [ActionButton; 3] = [ActionButton::A, ActionButton::B, ActionButton::Y];

    fn is_held(self, state: &ControllerState) -> bool {
        match self {
            ActionButton::A => state.btn_a,
            ActionButton::B => state.btn_b,
            ActionButton::Y => state.btn_y,
        }
    }
}

/// When a held button fires its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    /// Fire once on the released -> pressed transition.
    #[default]
    Edge,
    /// Fire on every evaluation while held (repeat-while-held).
    Level,
}

/// Tracks previous button levels to detect press transitions.
#[derive(Debug, Clone)]
pub struct ButtonEdges {
    mode: ButtonMode,
    prev_a: bool,
    prev_b: bool,
    prev_y: bool,
}

impl ButtonEdges {
    #[must_use]
    pub fn new(mode: ButtonMode) -> Self {
        Self {
            mode,
            prev_a: false,
            prev_b: false,
            prev_y: false,
        }
    }

    pub fn mode(&self) -> ButtonMode {
        self.mode
    }

    /// Returns the buttons whose action should fire this iteration, in
    /// A, B, Y order, and records the current levels.
    pub fn update(&mut self, state: &ControllerState) -> Vec<ActionButton> {
        let mode = self.mode;
        let mut fired = Vec::new();
        for button in ActionButton::ALL {
            let held = button.is_held(state);
            let prev = self.prev_mut(button);
            let fire = match mode {
                ButtonMode::Edge => held && !*prev,
                ButtonMode::Level => held,
            };
            *prev = held;
            if fire {
                fired.push(button);
            }
        }
        fired
    }

    fn prev_mut(&mut self, button: ActionButton) -> &mut bool {
        match button {
            ActionButton::A => &mut self.prev_a,
            ActionButton::B => &mut self.prev_b,
            ActionButton::Y => &mut self.prev_y,
        }
    }
}
