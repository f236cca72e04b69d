//! # Device Position Module
//!
//! Authoritative drawing-head position and the bounds it is clamped to.
//!
//! ## Invariant
//!
//! After any update `0 <= x <= max_x` and `0 <= y <= max_y`. Shrinking the
//! bounds re-clamps the current position; it is never rejected.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::device::profile::PrinterProfile;
use crate::error::{BridgeError, Result};

/// Fallback bed dimension (mm) when the profile is missing or unreadable.
pub const DEFAULT_DIMENSION: f64 = 200.0;

/// Axis limits derived from the printer profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub max_x: f64,
    pub max_y: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            max_x: DEFAULT_DIMENSION,
            max_y: DEFAULT_DIMENSION,
        }
    }
}

impl Bounds {
    /// # Errors
    ///
    /// Returns `Profile` if either limit is not a finite, non-negative number.
    pub fn new(max_x: f64, max_y: f64) -> Result<Self> {
        for (name, value) in [("width", max_x), ("depth", max_y)] {
            if !value.is_finite() || value < 0.0 {
                return Err(BridgeError::Profile(format!("invalid {}: {}", name, value)));
            }
        }
        Ok(Self { max_x, max_y })
    }

    /// Derives bounds from a printer profile.
    ///
    /// Missing volume or dimensions default to 200 mm. A `"center"` origin
    /// halves both dimensions; any other or missing origin uses them as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// use etch_bridge::device::profile::{PrinterProfile, Volume};
    /// use etch_bridge::motion::position::Bounds;
    ///
    /// let profile = PrinterProfile {
    ///     volume: Some(Volume { width: Some(220.0), depth: Some(220.0), origin: Some("center".into()) }),
    /// };
    /// let bounds = Bounds::from_profile(&profile)?;
    /// assert_eq!(bounds.max_x, 110.0);
    /// # Ok::<(), etch_bridge::error::BridgeError>(())
    /// ```
    pub fn from_profile(profile: &PrinterProfile) -> Result<Self> {
        let Some(volume) = &profile.volume else {
            return Ok(Self::default());
        };

        let mut width = volume.width.unwrap_or(DEFAULT_DIMENSION);
        let mut depth = volume.depth.unwrap_or(DEFAULT_DIMENSION);
        if volume.origin.as_deref() == Some("center") {
            width /= 2.0;
            depth /= 2.0;
        }
        Self::new(width, depth)
    }
}

/// Drawing head state owned by the motion arbiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePosition {
    pub x: f64,
    pub y: f64,
    pub bounds: Bounds,
    /// Pen lowered onto the surface.
    pub drawing: bool,
    pub z_drawing: f64,
    pub z_travel: f64,
}

impl DevicePosition {
    #[must_use]
    pub fn new(bounds: Bounds, z_drawing: f64, z_travel: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            bounds,
            drawing: false,
            z_drawing,
            z_travel,
        }
    }

    pub fn clamp_x(&self, x: f64) -> f64 {
        x.clamp(0.0, self.bounds.max_x)
    }

    pub fn clamp_y(&self, y: f64) -> f64 {
        y.clamp(0.0, self.bounds.max_y)
    }

    /// Replaces the bounds and re-clamps the current position into them.
    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
        self.x = self.clamp_x(self.x);
        self.y = self.clamp_y(self.y);
        info!(
            "Bounds updated: X={}mm, Y={}mm (position {:.2}, {:.2})",
            bounds.max_x, bounds.max_y, self.x, self.y
        );
    }

    /// Optimistically records a completed home.
    pub fn reset_to_origin(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
    }

    /// Moves to an already-bounded target, clamping defensively.
    pub fn move_to(&mut self, x: f64, y: f64) {
        self.x = self.clamp_x(x);
        self.y = self.clamp_y(y);
    }

    /// Pen height for the current drawing state.
    pub fn pen_height(&self) -> f64 {
        if self.drawing {
            self.z_drawing
        } else {
            self.z_travel
        }
    }
}

/// Position shared between the control loop and status readers.
///
/// Every read-modify-write must happen under one [`SharedPosition::lock`].
#[derive(Debug, Clone)]
pub struct SharedPosition(Arc<Mutex<DevicePosition>>);

impl SharedPosition {
    #[must_use]
    pub fn new(position: DevicePosition) -> Self {
        Self(Arc::new(Mutex::new(position)))
    }

    /// Locks the position. A poisoned lock still yields the last state.
    pub fn lock(&self) -> MutexGuard<'_, DevicePosition> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DevicePosition {
        self.lock().clone()
    }
}
