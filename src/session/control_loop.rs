//! # Control Loop
//!
//! Runs one controller session on a dedicated thread.
//!
//! ## Phases
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//! ```
//!
//! `Starting` (homing) and `Stopping` (bounded join) are driven by the
//! supervisor; the loop itself marks `Running` on entry and `Idle` on exit.
//!
//! ## Iteration
//!
//! 1. Exit if the stop signal is set
//! 2. Not connected: count an error
//! 3. Read a batch (empty = no change); failure counts an error
//! 4. Successful read resets the error counter
//! 5. Motion step when the cadence interval has elapsed
//! 6. Button actions, every iteration
//! 7. Wait `poll_interval` on the stop signal
//!
//! Reaching `max_errors` consecutive errors ends the session and pushes an
//! inactive status. Failed device sends are logged and never end the loop.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::signal::StopSignal;
use super::status::StatusEvent;
use crate::clock::Clock;
use crate::controller::buttons::ButtonEdges;
use crate::controller::gamepad::InputSource;
use crate::controller::normalizer::Normalizer;
use crate::motion::arbiter::MotionArbiter;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Phase readable from the supervisor while the loop runs.
#[derive(Debug, Clone, Default)]
pub struct SharedPhase(Arc<Mutex<LoopPhase>>);

impl SharedPhase {
    pub fn get(&self) -> LoopPhase {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, phase: LoopPhase) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != phase {
            debug!("Session phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop signal was observed.
    Stopped,
    /// `errors` consecutive failures exhausted the error budget.
    ErrorBudget { errors: u32 },
}

/// Everything one session's loop owns.
pub struct ControlLoop<C: Clock> {
    pub controller_id: String,
    pub input: Box<dyn InputSource>,
    pub normalizer: Normalizer,
    pub buttons: ButtonEdges,
    pub arbiter: MotionArbiter<C>,
    pub stop: StopSignal,
    pub connected: Arc<AtomicBool>,
    pub phase: SharedPhase,
    pub status_tx: broadcast::Sender<StatusEvent>,
    pub max_errors: u32,
    pub poll_interval: Duration,
}

impl<C: Clock> ControlLoop<C> {
    /// Runs until stopped or the error budget is exhausted.
    pub fn run(mut self) -> LoopExit {
        info!(
            "Etch-A-Sketch mode initialized for {}{}",
            self.controller_id,
            if self.normalizer.debug_mode() { " (DEBUG MODE)" } else { "" }
        );
        self.phase.set(LoopPhase::Running);

        let exit = self.poll_until_exit();

        self.phase.set(LoopPhase::Idle);
        match exit {
            LoopExit::Stopped => info!("Etch-A-Sketch mode terminated cleanly"),
            LoopExit::ErrorBudget { errors } => {
                error!(
                    "Session for {} ended after {} consecutive errors",
                    self.controller_id, errors
                );
                // No receivers is fine.
                let _ = self.status_tx.send(StatusEvent::inactive());
            }
        }
        exit
    }

    fn poll_until_exit(&mut self) -> LoopExit {
        let mut errors = 0u32;

        while !self.stop.is_set() {
            if !self.connected.load(Ordering::SeqCst) {
                errors += 1;
                if errors >= self.max_errors {
                    error!("Connection lost");
                    return LoopExit::ErrorBudget { errors };
                }
                self.stop.wait_timeout(self.poll_interval);
                continue;
            }

            match self.input.read_batch() {
                Ok(events) => {
                    errors = 0;
                    self.normalizer.process_batch(events.iter());
                }
                Err(e) => {
                    errors += 1;
                    warn!("Failed to read controller ({}/{}): {}", errors, self.max_errors, e);
                    if errors >= self.max_errors {
                        error!("Failed to read controller");
                        return LoopExit::ErrorBudget { errors };
                    }
                    self.stop.wait_timeout(self.poll_interval);
                    continue;
                }
            }

            let movement = self.normalizer.movement();
            if self.normalizer.take_new_movement() {
                debug!("Movement vector now {:?}", movement);
            }
            if let Err(e) = self.arbiter.step_if_due(&movement) {
                warn!("Movement command failed: {}", e);
            }

            let stop = self.stop.clone();
            for button in self.buttons.update(self.normalizer.state()) {
                debug!("Button {:?} fired", button);
                if let Err(e) = self.arbiter.handle_button(button, || stop.is_set()) {
                    warn!("Button action {:?} failed: {}", button, e);
                }
            }

            self.stop.wait_timeout(self.poll_interval);
        }

        LoopExit::Stopped
    }
}
