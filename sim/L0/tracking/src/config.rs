//! Tracker configuration.
//!
//! A [`TrackerConfig`] is a reusable preset: the same config can build
//! trackers for many bodies (one per vertex of a soft body, for example).
//! A tracker's configuration is fixed once it is built.

use std::rc::Rc;

use crate::registry::TrackingRegistry;
use crate::tracker::Tracker;
use crate::types::{BodyId, LockAxes, TrackingMode, UpdatePhase};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a single [`Tracker`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackerConfig {
    /// Phase the tracker is stepped in.
    pub phase: UpdatePhase,
    /// How position corrections are applied.
    pub position_mode: TrackingMode,
    /// How rotation corrections are applied.
    pub rotation_mode: TrackingMode,
    /// Axes position corrections must not touch.
    pub position_lock: LockAxes,
    /// Axes rotation corrections must not touch.
    pub rotation_lock: LockAxes,
    /// Maximum linear correction speed in velocity mode (m/s).
    pub linear_force_limit: f64,
    /// Angular speed ceiling written to the body in velocity mode (rad/s).
    pub angular_force_limit: f64,
    /// Maximum number of simultaneous targets.
    pub max_tracked: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            phase: UpdatePhase::PerFixedStep,
            position_mode: TrackingMode::Velocity,
            rotation_mode: TrackingMode::Velocity,
            position_lock: LockAxes::empty(),
            rotation_lock: LockAxes::empty(),
            linear_force_limit: 10.0,
            angular_force_limit: 20.0,
            max_tracked: 1,
        }
    }
}

impl TrackerConfig {
    /// Physics-driven follower of a single target (the default).
    #[must_use]
    pub fn follower() -> Self {
        Self::default()
    }

    /// Snap position and rotation onto the targets every frame.
    #[must_use]
    pub fn kinematic() -> Self {
        Self {
            phase: UpdatePhase::PerFrame,
            position_mode: TrackingMode::Instant,
            rotation_mode: TrackingMode::Instant,
            ..Default::default()
        }
    }

    /// Physics-driven follower of up to `max_tracked` targets.
    #[must_use]
    pub fn multi_target(max_tracked: usize) -> Self {
        Self {
            max_tracked,
            ..Default::default()
        }
    }

    /// Set the update phase.
    #[must_use]
    pub fn with_phase(mut self, phase: UpdatePhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set both tracking modes.
    #[must_use]
    pub fn with_modes(mut self, position: TrackingMode, rotation: TrackingMode) -> Self {
        self.position_mode = position;
        self.rotation_mode = rotation;
        self
    }

    /// Lock position correction axes.
    #[must_use]
    pub fn with_position_lock(mut self, lock: LockAxes) -> Self {
        self.position_lock = lock;
        self
    }

    /// Lock rotation correction axes.
    #[must_use]
    pub fn with_rotation_lock(mut self, lock: LockAxes) -> Self {
        self.rotation_lock = lock;
        self
    }

    /// Set linear and angular limits.
    #[must_use]
    pub fn with_limits(mut self, linear: f64, angular: f64) -> Self {
        self.linear_force_limit = linear;
        self.angular_force_limit = angular;
        self
    }

    /// Set the maximum number of targets.
    #[must_use]
    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::InvalidConfig`](crate::TrackingError::InvalidConfig)
    /// if either limit is negative or NaN, or if `max_tracked` is zero.
    pub fn validate(&self) -> crate::Result<()> {
        // Infinity is a valid "no limit" for both.
        if self.linear_force_limit.is_nan() || self.linear_force_limit < 0.0 {
            return Err(crate::TrackingError::invalid_config(format!(
                "linear force limit must be non-negative, got {}",
                self.linear_force_limit
            )));
        }

        if self.angular_force_limit.is_nan() || self.angular_force_limit < 0.0 {
            return Err(crate::TrackingError::invalid_config(format!(
                "angular force limit must be non-negative, got {}",
                self.angular_force_limit
            )));
        }

        if self.max_tracked == 0 {
            return Err(crate::TrackingError::invalid_config(
                "max tracked must be at least 1",
            ));
        }

        Ok(())
    }

    /// Build a tracker for `owner` that registers with `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::InvalidConfig`](crate::TrackingError::InvalidConfig)
    /// if the configuration does not validate.
    pub fn build(&self, owner: BodyId, registry: &TrackingRegistry) -> crate::Result<Rc<Tracker>> {
        Tracker::new(owner, self.clone(), registry)
    }
}
