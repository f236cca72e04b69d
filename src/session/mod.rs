//! # Session Module
//!
//! Lifetime of one controller-to-device binding: the stop signal, the
//! control loop thread, the supervisor owning it and the status payloads
//! it pushes.

pub mod control_loop;
pub mod signal;
pub mod status;
pub mod supervisor;
