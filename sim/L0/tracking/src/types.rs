//! Value types shared by trackers, the registry, and body sets.
//!
//! Poses and twists are plain values. Trackers read them from a
//! [`BodySet`](crate::BodySet), compute new values, and write the result back
//! explicitly.

use nalgebra::{Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a rigid body owned by the host simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u64);

impl BodyId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Position and orientation of a body.
///
/// # Example
///
/// ```
/// use sim_tracking::Pose;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let pose = Pose::new(
///     Point3::new(1.0, 0.0, 0.0),
///     UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
/// );
///
/// // Local +X ends up along world +Y, shifted by the position.
/// let world = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert!((world - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn new(position: Point3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Origin, no rotation.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_position(Point3::origin())
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Transform a point from this pose's local frame to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Transform a point from world coordinates into this pose's local frame.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (world - self.position))
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

/// Linear and angular velocity of a body, both in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Twist {
    /// Linear velocity (m/s).
    pub linear: Vector3<f64>,
    /// Angular velocity (rad/s).
    pub angular: Vector3<f64>,
}

impl Default for Twist {
    fn default() -> Self {
        Self::zero()
    }
}

impl Twist {
    /// Create a twist with specified linear and angular velocity.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// At rest.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Linear velocity only.
    #[must_use]
    pub fn linear(v: Vector3<f64>) -> Self {
        Self::new(v, Vector3::zeros())
    }

    /// Angular velocity only.
    #[must_use]
    pub fn angular(omega: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), omega)
    }
}

/// Kinematic state of a body as seen by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyState {
    /// Position and orientation.
    pub pose: Pose,
    /// Linear and angular velocity.
    pub twist: Twist,
}

impl BodyState {
    /// Create a state from pose and twist.
    #[must_use]
    pub const fn new(pose: Pose, twist: Twist) -> Self {
        Self { pose, twist }
    }

    /// A state at rest at the given pose.
    #[must_use]
    pub fn at_rest(pose: Pose) -> Self {
        Self::new(pose, Twist::zero())
    }
}

/// How a correction is applied to the controlled body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrackingMode {
    /// Write a velocity and let the physics step move the body.
    #[default]
    Velocity,
    /// Displace the body directly.
    Instant,
}

/// Scheduling group a tracker is stepped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UpdatePhase {
    /// Variable-rate phase, once per rendered frame.
    PerFrame,
    /// Fixed-rate phase, once per physics step.
    #[default]
    PerFixedStep,
}

impl UpdatePhase {
    /// Both phases, in the order a host usually ticks them.
    pub const ALL: [Self; 2] = [Self::PerFixedStep, Self::PerFrame];

    /// The other phase.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::PerFrame => Self::PerFixedStep,
            Self::PerFixedStep => Self::PerFrame,
        }
    }
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerFrame => f.write_str("per-frame"),
            Self::PerFixedStep => f.write_str("per-fixed-step"),
        }
    }
}

bitflags::bitflags! {
    /// World axes a correction must not touch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct LockAxes: u8 {
        /// Lock the X component.
        const X = 0b0000_0001;
        /// Lock the Y component.
        const Y = 0b0000_0010;
        /// Lock the Z component.
        const Z = 0b0000_0100;
        /// Lock every component.
        const ALL = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
    }
}

impl LockAxes {
    /// Zero the components of `v` whose axis is locked.
    #[must_use]
    pub fn apply(self, mut v: Vector3<f64>) -> Vector3<f64> {
        if self.contains(Self::X) {
            v.x = 0.0;
        }
        if self.contains(Self::Y) {
            v.y = 0.0;
        }
        if self.contains(Self::Z) {
            v.z = 0.0;
        }
        v
    }
}
