//! # Session Supervisor
//!
//! Owns the single controller session and exposes the control surface to
//! the host: list, activate, deactivate, refresh, status and the printer
//! lifecycle events.
//!
//! ## Session Rules
//!
//! - At most one session runs at a time
//! - Activating the running controller again is a successful no-op
//! - Activating a different controller while one runs fails with
//!   `SessionActive`
//! - Deactivating without a session is a successful no-op
//! - A session that ended on its own (error budget) is reaped by the next
//!   operation
//!
//! ## Deactivation
//!
//! The stop signal is set, then the loop thread is polled for up to
//! `shutdown_timeout`, then for up to `final_join_timeout` more. A thread
//! still running after both waits is detached with a warning, and no new
//! session starts until it has exited.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::control_loop::{ControlLoop, LoopExit, LoopPhase, SharedPhase};
use super::signal::StopSignal;
use super::status::{ApiCommand, ApiResponse, StatusEvent, StatusReport};
use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::controller::buttons::ButtonEdges;
use crate::controller::gamepad::{ControllerInfo, ControllerScanner};
use crate::controller::normalizer::Normalizer;
use crate::device::profile::ProfileSource;
use crate::device::{CommandSender, DeviceSink};
use crate::error::{BridgeError, Result};
use crate::motion::arbiter::{ArbiterSettings, MotionArbiter};
use crate::motion::gcode::MotionCommand;
use crate::motion::position::{Bounds, DevicePosition, SharedPosition};

/// How often a stopping loop thread is checked for exit.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capacity of the status push channel.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Printer lifecycle events from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Connected,
    Disconnected,
    PrinterProfileModified,
    PrintStarted,
    PrintDone,
    PrintFailed,
    PrintCancelled,
}

struct Session {
    controller_id: String,
    stop: StopSignal,
    handle: JoinHandle<LoopExit>,
    started_at: DateTime<Utc>,
}

/// Single-session owner.
pub struct Supervisor {
    config: Config,
    scanner: Box<dyn ControllerScanner>,
    profiles: Box<dyn ProfileSource>,
    sender: CommandSender,
    position: SharedPosition,
    connected: Arc<AtomicBool>,
    printing: bool,
    phase: SharedPhase,
    status_tx: broadcast::Sender<StatusEvent>,
    session: Option<Session>,
    /// Loop thread that outlived both join timeouts.
    detached: Option<Session>,
}

impl Supervisor {
    /// Builds a supervisor and loads the initial bounds.
    ///
    /// The device starts out disconnected until a
    /// [`HostEvent::Connected`] arrives.
    pub fn new(
        config: Config,
        scanner: Box<dyn ControllerScanner>,
        profiles: Box<dyn ProfileSource>,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        let sender = CommandSender::new(sink, config.motion.command_delay())
            .with_dry_run(config.controller.debug_mode);
        let position = SharedPosition::new(DevicePosition::new(
            Bounds::default(),
            config.motion.z_drawing,
            config.motion.z_travel,
        ));
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let mut supervisor = Self {
            config,
            scanner,
            profiles,
            sender,
            position,
            connected: Arc::new(AtomicBool::new(false)),
            printing: false,
            phase: SharedPhase::default(),
            status_tx,
            session: None,
            detached: None,
        };
        supervisor.update_bounds();
        supervisor
    }

    /// Receiver for status push events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn position(&self) -> &SharedPosition {
        &self.position
    }

    /// Id of the running session's controller.
    pub fn active_controller(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.controller_id.as_str())
    }

    /// Fresh enumeration of attached controllers.
    ///
    /// # Errors
    ///
    /// Propagates scanner failures.
    pub fn list_controllers(&self) -> Result<Vec<ControllerInfo>> {
        let controllers = self.scanner.list()?;
        if controllers.is_empty() {
            info!("No controllers found during refresh");
        } else {
            info!("Found {} controller(s):", controllers.len());
            for controller in &controllers {
                info!("  - {} ({})", controller.name, controller.id);
            }
        }
        Ok(controllers)
    }

    /// Starts a session for `controller_id`.
    ///
    /// Homes all axes (`G28 X Y`, `G28 Z`), resets the tracked position and
    /// spawns the control loop thread.
    ///
    /// # Errors
    ///
    /// - `DeviceNotOperational`: the device is not ready
    /// - `MissingControllerId`: no or empty id
    /// - `SessionActive`: another controller owns the running session
    /// - `SessionStopping`: a detached loop thread is still running
    /// - open or homing failures
    pub fn activate(&mut self, controller_id: Option<&str>) -> Result<()> {
        self.reap_finished();

        if !self.sender.is_operational() {
            return Err(BridgeError::DeviceNotOperational);
        }
        let id = controller_id
            .filter(|id| !id.is_empty())
            .ok_or(BridgeError::MissingControllerId)?;

        if let Some(session) = &self.session {
            if session.controller_id == id {
                info!("Controller thread already running for {}", id);
                return Ok(());
            }
            return Err(BridgeError::SessionActive(session.controller_id.clone()));
        }
        if let Some(detached) = &self.detached {
            warn!(
                "Controller thread for {} has not exited yet",
                detached.controller_id
            );
            return Err(BridgeError::SessionStopping(detached.controller_id.clone()));
        }

        self.phase.set(LoopPhase::Starting);
        match self.start_session(id) {
            Ok(session) => {
                info!(
                    "Controller thread started for {} (Debug Mode: {})",
                    id, self.config.controller.debug_mode
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                error!("Failed to activate controller {}: {}", id, e);
                self.phase.set(LoopPhase::Idle);
                Err(e)
            }
        }
    }

    fn start_session(&mut self, id: &str) -> Result<Session> {
        let input = self.scanner.open(id)?;

        info!("Homing all axes...");
        self.sender.send(&[MotionCommand::HomeXY])?;
        self.sender.send(&[MotionCommand::HomeZ])?;
        self.position.lock().reset_to_origin();

        let mut normalizer = Normalizer::new(
            self.config.controller.movement_threshold,
            self.config.controller.significance,
        );
        normalizer.set_debug_mode(self.config.controller.debug_mode);

        let arbiter = MotionArbiter::new(
            self.position.clone(),
            self.sender.clone(),
            ArbiterSettings::from_config(&self.config.controller, &self.config.motion),
            MonotonicClock::new(),
        );

        let stop = StopSignal::new();
        let control = ControlLoop {
            controller_id: id.to_string(),
            input,
            normalizer,
            buttons: ButtonEdges::new(self.config.controller.button_mode),
            arbiter,
            stop: stop.clone(),
            connected: self.connected.clone(),
            phase: self.phase.clone(),
            status_tx: self.status_tx.clone(),
            max_errors: self.config.session.max_errors,
            poll_interval: self.config.motion.poll_interval(),
        };

        // Pushed before the thread starts so it always precedes the loop's
        // own inactive push. No receivers is fine.
        let _ = self.status_tx.send(StatusEvent::active(id));
        let handle = match thread::Builder::new()
            .name("etch-control".to_string())
            .spawn(move || control.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.status_tx.send(StatusEvent::inactive());
                return Err(e.into());
            }
        };

        Ok(Session {
            controller_id: id.to_string(),
            stop,
            handle,
            started_at: Utc::now(),
        })
    }

    /// Stops the running session, if any.
    ///
    /// Blocks for at most `shutdown_timeout + final_join_timeout`.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the other operations.
    pub fn deactivate(&mut self) -> Result<()> {
        self.reap_finished();
        let Some(session) = self.session.take() else {
            debug!("No active session to deactivate");
            return Ok(());
        };

        info!("Initiating controller shutdown...");
        self.phase.set(LoopPhase::Stopping);
        session.stop.set();

        let shutdown_timeout = self.config.session.shutdown_timeout();
        info!(
            "Waiting up to {:?} for controller thread to stop...",
            shutdown_timeout
        );
        let mut finished = wait_for_exit(&session.handle, shutdown_timeout);
        if !finished {
            warn!("Thread shutdown timed out, attempting final cleanup");
            finished = wait_for_exit(&session.handle, self.config.session.final_join_timeout());
        }

        if finished {
            match session.handle.join() {
                Ok(exit) => debug!("Control loop exited: {:?}", exit),
                Err(_) => error!("Control loop thread panicked"),
            }
        } else {
            warn!(
                "Controller thread for {} still running, detaching",
                session.controller_id
            );
            self.detached = Some(session);
        }

        self.phase.set(LoopPhase::Idle);
        let _ = self.status_tx.send(StatusEvent::inactive());
        info!("Controller shutdown completed successfully");
        Ok(())
    }

    /// Re-enumerates controllers, deactivating the session if its
    /// controller disappeared.
    ///
    /// # Errors
    ///
    /// Propagates scanner failures.
    pub fn refresh(&mut self) -> Result<Vec<ControllerInfo>> {
        self.reap_finished();
        let controllers = self.list_controllers()?;

        if let Some(active) = self.active_controller().map(str::to_string) {
            if controllers.iter().any(|c| c.id == active) {
                info!("Active controller {} still available", active);
            } else {
                info!("Previously active controller {} no longer available", active);
                self.deactivate()?;
            }
        }
        Ok(controllers)
    }

    /// Re-reads the printer profile into the tracked bounds.
    ///
    /// Any failure falls back to 200 x 200.
    pub fn update_bounds(&mut self) {
        let bounds = self
            .profiles
            .current_or_default()
            .and_then(|profile| Bounds::from_profile(&profile))
            .unwrap_or_else(|e| {
                error!("Error updating printer dimensions: {}", e);
                Bounds::default()
            });
        self.position.lock().set_bounds(bounds);
    }

    /// Applies a printer lifecycle event.
    pub fn on_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Connected => {
                info!("Printer connected");
                self.connected.store(true, Ordering::SeqCst);
                self.printing = false;
                self.update_bounds();
            }
            HostEvent::Disconnected => {
                info!("Printer disconnected");
                self.connected.store(false, Ordering::SeqCst);
                self.printing = false;
            }
            HostEvent::PrinterProfileModified => {
                info!("Printer profile modified");
                self.update_bounds();
            }
            HostEvent::PrintStarted => {
                info!("Print started");
                self.printing = true;
            }
            HostEvent::PrintDone | HostEvent::PrintFailed | HostEvent::PrintCancelled => {
                debug!("Print ended: {:?}", event);
                self.printing = false;
            }
        }
    }

    /// Host shutdown hook.
    ///
    /// # Errors
    ///
    /// See [`deactivate`](Self::deactivate).
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Shutdown received...");
        self.deactivate()
    }

    pub fn status(&mut self) -> StatusReport {
        self.reap_finished();
        let position = self.position.snapshot();
        StatusReport {
            active: self.session.is_some(),
            controller_id: self.session.as_ref().map(|s| s.controller_id.clone()),
            phase: self.phase.get(),
            started_at: self.session.as_ref().map(|s| s.started_at),
            x: position.x,
            y: position.y,
            max_x: position.bounds.max_x,
            max_y: position.bounds.max_y,
            drawing: position.drawing,
            connected: self.connected.load(Ordering::SeqCst),
            printing: self.printing,
            dry_run: self.sender.is_dry_run(),
        }
    }

    /// Dispatches a host command; failures become `success: false`.
    pub fn handle_command(&mut self, command: ApiCommand) -> ApiResponse {
        debug!("API command: {:?}", command);
        match command {
            ApiCommand::Activate { controller_id } => {
                self.activate(controller_id.as_deref()).into()
            }
            ApiCommand::Deactivate => self.deactivate().into(),
            ApiCommand::Refresh => match self.refresh() {
                Ok(controllers) => ApiResponse::ok().with_controllers(controllers),
                Err(e) => {
                    error!("Error during controller refresh: {}", e);
                    ApiResponse::failure(&e).with_controllers(Vec::new())
                }
            },
            ApiCommand::List => match self.list_controllers() {
                Ok(controllers) => ApiResponse::ok().with_controllers(controllers),
                Err(e) => {
                    error!("Error scanning for controllers: {}", e);
                    ApiResponse::failure(&e).with_controllers(Vec::new())
                }
            },
            ApiCommand::Status => ApiResponse::ok().with_status(self.status()),
        }
    }

    /// Drops a session whose loop already exited on its own, and a
    /// detached thread that has finally stopped.
    fn reap_finished(&mut self) {
        let detached_done = self
            .detached
            .as_ref()
            .is_some_and(|d| d.handle.is_finished());
        if detached_done {
            if let Some(detached) = self.detached.take() {
                match detached.handle.join() {
                    Ok(exit) => info!(
                        "Detached controller thread for {} exited ({:?})",
                        detached.controller_id, exit
                    ),
                    Err(_) => error!("Control loop thread for {} panicked", detached.controller_id),
                }
            }
        }

        let finished = self
            .session
            .as_ref()
            .is_some_and(|s| s.handle.is_finished());
        if !finished {
            return;
        }
        if let Some(session) = self.session.take() {
            match session.handle.join() {
                Ok(exit) => info!(
                    "Reaped session for {} ({:?})",
                    session.controller_id, exit
                ),
                Err(_) => error!("Control loop thread for {} panicked", session.controller_id),
            }
            self.phase.set(LoopPhase::Idle);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.stop.set();
        }
    }
}

/// Polls until the thread finishes or `timeout` passes.
fn wait_for_exit<T>(handle: &JoinHandle<T>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::gamepad::mocks::ScriptedInput;
    use crate::controller::gamepad::{InputSource, MockControllerScanner};
    use crate::device::mocks::RecordingSink;
    use crate::device::profile::{MockProfileSource, PrinterProfile, Volume};
    use evdev::{EventType, InputEvent, Key};
    use tokio::sync::broadcast::error::TryRecvError;

    const PAD: &str = "/dev/input/event5";
    const OTHER_PAD: &str = "/dev/input/event7";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.motion.command_delay_ms = 0;
        config.motion.poll_interval_ms = 1;
        config
    }

    fn pad_info(id: &str) -> ControllerInfo {
        ControllerInfo {
            id: id.to_string(),
            name: "Xbox Wireless Controller".to_string(),
        }
    }

    fn profile_source(width: f64, depth: f64, origin: &str) -> Box<MockProfileSource> {
        let origin = origin.to_string();
        let mut profiles = MockProfileSource::new();
        profiles.expect_current_or_default().returning(move || {
            Ok(PrinterProfile {
                volume: Some(Volume {
                    width: Some(width),
                    depth: Some(depth),
                    origin: Some(origin.clone()),
                }),
            })
        });
        Box::new(profiles)
    }

    /// Scanner listing `ids` and opening `input` for any of them.
    fn scanner(ids: &[&str], input: &ScriptedInput) -> MockControllerScanner {
        let listed: Vec<ControllerInfo> = ids.iter().map(|id| pad_info(id)).collect();
        let input = input.clone();
        let mut scanner = MockControllerScanner::new();
        scanner.expect_list().returning(move || Ok(listed.clone()));
        scanner
            .expect_open()
            .returning(move |_| Ok(Box::new(input.clone())));
        scanner
    }

    fn connected_supervisor(scanner: MockControllerScanner, sink: &Arc<RecordingSink>) -> Supervisor {
        let mut supervisor = Supervisor::new(
            test_config(),
            Box::new(scanner),
            profile_source(200.0, 200.0, "lowerleft"),
            sink.clone(),
        );
        supervisor.on_event(HostEvent::Connected);
        supervisor
    }

    /// Input whose reads park until `release` is set.
    struct StallingInput {
        release: StopSignal,
    }

    impl InputSource for StallingInput {
        fn read_batch(&mut self) -> Result<Vec<InputEvent>> {
            while !self.release.wait_timeout(Duration::from_millis(5)) {}
            Ok(Vec::new())
        }
    }

    fn wait_for_event(
        rx: &mut broadcast::Receiver<StatusEvent>,
        expected: &StatusEvent,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(event) if event == *expected => return true,
                Ok(_) => {}
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(_) => return false,
            }
        }
        false
    }

    #[test]
    fn test_activate_requires_operational_device() {
        let sink = RecordingSink::new();
        sink.set_operational(false);
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        let err = supervisor.activate(Some(PAD)).unwrap_err();
        assert!(matches!(err, BridgeError::DeviceNotOperational));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_activate_requires_controller_id() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        assert!(matches!(supervisor.activate(None), Err(BridgeError::MissingControllerId)));
        assert!(matches!(supervisor.activate(Some("")), Err(BridgeError::MissingControllerId)));
        assert!(supervisor.active_controller().is_none());
    }

    #[test]
    fn test_activate_homes_and_broadcasts() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);
        supervisor.position().lock().move_to(20.0, 30.0);
        let mut rx = supervisor.subscribe();

        supervisor.activate(Some(PAD)).unwrap();

        assert_eq!(sink.lines(), vec!["G28 X Y", "G28 Z"]);
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::active(PAD));
        let status = supervisor.status();
        assert!(status.active);
        assert_eq!(status.controller_id.as_deref(), Some(PAD));
        assert!(status.started_at.is_some());
        assert_eq!((status.x, status.y), (0.0, 0.0));

        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_activate_twice_spawns_one_session() {
        let input = ScriptedInput::new();
        let mut scanner = MockControllerScanner::new();
        let opened = input.clone();
        scanner
            .expect_open()
            .times(1)
            .returning(move |_| Ok(Box::new(opened.clone())));
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner, &sink);

        supervisor.activate(Some(PAD)).unwrap();
        supervisor.activate(Some(PAD)).unwrap();

        // Homing ran once.
        assert_eq!(sink.lines(), vec!["G28 X Y", "G28 Z"]);
        assert_eq!(supervisor.active_controller(), Some(PAD));
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_activate_different_controller_rejected() {
        let sink = RecordingSink::new();
        let mut supervisor =
            connected_supervisor(scanner(&[PAD, OTHER_PAD], &ScriptedInput::new()), &sink);

        supervisor.activate(Some(PAD)).unwrap();
        let err = supervisor.activate(Some(OTHER_PAD)).unwrap_err();

        assert!(matches!(err, BridgeError::SessionActive(ref id) if id == PAD));
        assert_eq!(supervisor.active_controller(), Some(PAD));
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_activate_open_failure_leaves_idle() {
        let mut scanner = MockControllerScanner::new();
        scanner
            .expect_open()
            .returning(|id| Err(BridgeError::ControllerNotFound(id.to_string())));
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner, &sink);

        assert!(matches!(
            supervisor.activate(Some(PAD)),
            Err(BridgeError::ControllerNotFound(_))
        ));
        assert!(sink.lines().is_empty());
        let status = supervisor.status();
        assert!(!status.active);
        assert_eq!(status.phase, LoopPhase::Idle);
    }

    #[test]
    fn test_activate_homing_failure_reported() {
        let sink = RecordingSink::new();
        sink.set_fail_sends(true);
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        assert!(matches!(supervisor.activate(Some(PAD)), Err(BridgeError::Command(_))));
        assert!(supervisor.active_controller().is_none());
    }

    #[test]
    fn test_deactivate_without_session_is_noop() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);
        let mut rx = supervisor.subscribe();

        supervisor.deactivate().unwrap();
        supervisor.deactivate().unwrap();

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_deactivate_stops_loop_and_broadcasts() {
        let input = ScriptedInput::new();
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &input), &sink);
        let mut rx = supervisor.subscribe();

        supervisor.activate(Some(PAD)).unwrap();
        let start = Instant::now();
        supervisor.deactivate().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::active(PAD));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::inactive());
        let status = supervisor.status();
        assert!(!status.active);
        assert_eq!(status.phase, LoopPhase::Idle);

        // Loop is gone; no more reads happen.
        let reads = input.read_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(input.read_count(), reads);
    }

    #[test]
    fn test_error_budget_terminates_session() {
        let input = ScriptedInput::new();
        input.fail_forever();
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &input), &sink);
        let mut rx = supervisor.subscribe();

        supervisor.activate(Some(PAD)).unwrap();

        assert!(wait_for_event(&mut rx, &StatusEvent::inactive(), Duration::from_secs(2)));
        assert_eq!(input.read_count(), 10);

        // Reaped on the next operation.
        let status = supervisor.status();
        assert!(!status.active);
        assert_eq!(status.phase, LoopPhase::Idle);

        // A new session can start afterwards.
        supervisor.activate(Some(PAD)).unwrap();
        assert_eq!(supervisor.active_controller(), Some(PAD));
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_refresh_deactivates_missing_controller() {
        let input = ScriptedInput::new();
        let mut scanner = MockControllerScanner::new();
        scanner
            .expect_open()
            .returning(move |_| Ok(Box::new(input.clone())));
        scanner
            .expect_list()
            .returning(|| Ok(vec![pad_info(OTHER_PAD)]));
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner, &sink);

        supervisor.activate(Some(PAD)).unwrap();
        let controllers = supervisor.refresh().unwrap();

        assert_eq!(controllers, vec![pad_info(OTHER_PAD)]);
        assert!(supervisor.active_controller().is_none());
    }

    #[test]
    fn test_refresh_keeps_present_controller() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        supervisor.activate(Some(PAD)).unwrap();
        let controllers = supervisor.refresh().unwrap();

        assert_eq!(controllers, vec![pad_info(PAD)]);
        assert_eq!(supervisor.active_controller(), Some(PAD));
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_bounds_from_profile_on_connect() {
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            test_config(),
            Box::new(MockControllerScanner::new()),
            profile_source(300.0, 240.0, "center"),
            sink.clone(),
        );
        supervisor.on_event(HostEvent::Connected);

        let status = supervisor.status();
        assert_eq!((status.max_x, status.max_y), (150.0, 120.0));
    }

    #[test]
    fn test_bounds_fall_back_on_profile_error() {
        let mut profiles = MockProfileSource::new();
        profiles
            .expect_current_or_default()
            .returning(|| Err(BridgeError::Profile("unreadable".to_string())));
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            test_config(),
            Box::new(MockControllerScanner::new()),
            Box::new(profiles),
            sink.clone(),
        );

        supervisor.update_bounds();
        let status = supervisor.status();
        assert_eq!((status.max_x, status.max_y), (200.0, 200.0));
    }

    #[test]
    fn test_profile_change_reclamps_position() {
        let mut profiles = MockProfileSource::new();
        let mut width = 200.0;
        profiles.expect_current_or_default().returning(move || {
            let profile = PrinterProfile {
                volume: Some(Volume {
                    width: Some(width),
                    depth: Some(200.0),
                    origin: None,
                }),
            };
            width = 100.0;
            Ok(profile)
        });
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            test_config(),
            Box::new(MockControllerScanner::new()),
            Box::new(profiles),
            sink.clone(),
        );
        supervisor.position().lock().move_to(180.0, 50.0);

        supervisor.on_event(HostEvent::PrinterProfileModified);

        let status = supervisor.status();
        assert_eq!(status.max_x, 100.0);
        assert_eq!((status.x, status.y), (100.0, 50.0));
    }

    #[test]
    fn test_lifecycle_flags() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);
        assert!(supervisor.status().connected);

        supervisor.on_event(HostEvent::PrintStarted);
        assert!(supervisor.status().printing);
        supervisor.on_event(HostEvent::PrintCancelled);
        assert!(!supervisor.status().printing);

        supervisor.on_event(HostEvent::PrintStarted);
        supervisor.on_event(HostEvent::Disconnected);
        let status = supervisor.status();
        assert!(!status.connected);
        assert!(!status.printing);
    }

    #[test]
    fn test_disconnect_ends_session() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);
        let mut rx = supervisor.subscribe();

        supervisor.activate(Some(PAD)).unwrap();
        supervisor.on_event(HostEvent::Disconnected);

        assert!(wait_for_event(&mut rx, &StatusEvent::inactive(), Duration::from_secs(2)));
        assert!(!supervisor.status().active);
    }

    #[test]
    fn test_debug_mode_is_dry_run() {
        let mut config = test_config();
        config.controller.debug_mode = true;
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            config,
            Box::new(scanner(&[PAD], &ScriptedInput::new())),
            profile_source(200.0, 200.0, "lowerleft"),
            sink.clone(),
        );
        supervisor.on_event(HostEvent::Connected);

        supervisor.activate(Some(PAD)).unwrap();

        assert!(supervisor.status().dry_run);
        assert!(sink.lines().is_empty());
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_handle_command_responses() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        let response = supervisor.handle_command(ApiCommand::Activate { controller_id: None });
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("No controller ID provided"));

        let response = supervisor.handle_command(ApiCommand::List);
        assert_eq!(response.controllers, Some(vec![pad_info(PAD)]));

        let response = supervisor.handle_command(ApiCommand::Activate {
            controller_id: Some(PAD.to_string()),
        });
        assert!(response.success);

        let response = supervisor.handle_command(ApiCommand::Status);
        assert!(response.status.unwrap().active);

        let response = supervisor.handle_command(ApiCommand::Deactivate);
        assert!(response.success);
    }

    #[test]
    fn test_refresh_command_failure() {
        let mut scanner = MockControllerScanner::new();
        scanner
            .expect_list()
            .returning(|| Err(BridgeError::Controller("udev unavailable".to_string())));
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner, &sink);

        let response = supervisor.handle_command(ApiCommand::Refresh);
        assert!(!response.success);
        assert_eq!(response.controllers, Some(Vec::new()));
    }

    #[test]
    fn test_shutdown_deactivates() {
        let sink = RecordingSink::new();
        let mut supervisor = connected_supervisor(scanner(&[PAD], &ScriptedInput::new()), &sink);

        supervisor.activate(Some(PAD)).unwrap();
        supervisor.shutdown().unwrap();

        assert!(supervisor.active_controller().is_none());
    }

    #[test]
    fn test_detached_thread_blocks_new_session() {
        let release = StopSignal::new();
        let gate = release.clone();
        let mut scanner = MockControllerScanner::new();
        scanner.expect_open().returning(move |_| {
            Ok(Box::new(StallingInput {
                release: gate.clone(),
            }))
        });
        let mut config = test_config();
        config.session.shutdown_timeout_ms = 20;
        config.session.final_join_timeout_ms = 20;
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            config,
            Box::new(scanner),
            profile_source(200.0, 200.0, "lowerleft"),
            sink.clone(),
        );
        supervisor.on_event(HostEvent::Connected);

        supervisor.activate(Some(PAD)).unwrap();
        // Let the loop park inside its first read.
        thread::sleep(Duration::from_millis(50));
        supervisor.deactivate().unwrap();
        assert!(supervisor.active_controller().is_none());

        let err = supervisor.activate(Some(PAD)).unwrap_err();
        assert!(matches!(err, BridgeError::SessionStopping(ref id) if id == PAD));
        assert_eq!(sink.lines(), vec!["G28 X Y", "G28 Z"]);

        release.set();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match supervisor.activate(Some(PAD)) {
                Ok(()) => break,
                Err(BridgeError::SessionStopping(_)) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("activation failed: {}", e),
            }
        }
        assert_eq!(supervisor.active_controller(), Some(PAD));
        supervisor.deactivate().unwrap();
    }

    #[test]
    fn test_deactivate_interrupts_shake_clear() {
        let input = ScriptedInput::new();
        let mut config = test_config();
        // 18 shake sub-moves at 20ms each take well over 300ms.
        config.motion.command_delay_ms = 20;
        let sink = RecordingSink::new();
        let mut supervisor = Supervisor::new(
            config,
            Box::new(scanner(&[PAD], &input)),
            profile_source(200.0, 200.0, "lowerleft"),
            sink.clone(),
        );
        supervisor.on_event(HostEvent::Connected);

        supervisor.activate(Some(PAD)).unwrap();
        input.push_batch(vec![InputEvent::new(EventType::KEY, Key::BTN_NORTH.code(), 1)]);
        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.lines().len() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(sink.lines().len() >= 4, "shake clear never started");

        let start = Instant::now();
        supervisor.deactivate().unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));

        let lines = sink.lines();
        assert!(lines.len() < 2 + 18);
        assert_eq!(lines.iter().filter(|l| *l == "G28 X Y").count(), 1);
        assert_eq!(supervisor.status().phase, LoopPhase::Idle);
    }
}
