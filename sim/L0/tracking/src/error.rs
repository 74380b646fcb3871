//! Error types for tracking operations.

use thiserror::Error;

use crate::types::BodyId;

/// Errors that can occur while binding or stepping trackers.
///
/// None of these are fatal: the registry logs step failures and moves on to
/// the next tracker.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    /// A new target was offered to a tracker that is already full.
    #[error("tracker is at capacity ({max_tracked} targets)")]
    CapacityExceeded {
        /// Configured maximum number of targets.
        max_tracked: usize,
    },

    /// A referenced body is not present in the body set.
    #[error("body not found: {0}")]
    BodyNotFound(BodyId),

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// A computed correction contains `NaN` or `Inf`.
    #[error("correction diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },
}

impl TrackingError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Check if this is a capacity error.
    #[must_use]
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Check if this is a missing-body error.
    #[must_use]
    pub fn is_body_not_found(&self) -> bool {
        matches!(self, Self::BodyNotFound(_))
    }
}

/// Check that `dt` is usable as a step duration.
///
/// # Errors
///
/// Returns [`TrackingError::InvalidTimestep`] if `dt` is not positive and finite.
pub fn validate_timestep(dt: f64) -> crate::Result<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(TrackingError::InvalidTimestep(dt))
    }
}
