//! # Etch Bridge Library
//!
//! Drive an Etch-A-Sketch style plotter with a dual-stick game controller.
//!
//! Controller events are normalized into a movement vector, mapped onto a
//! bounded, rate-limited drawing-head position and sent to the motion
//! controller as G-code. A supervisor owns the single active session and
//! exposes activate/deactivate/refresh/status to the host.

pub mod clock;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod motion;
pub mod session;
