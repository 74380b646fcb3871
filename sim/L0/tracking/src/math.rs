//! Correction math for pose tracking.
//!
//! Everything here is a pure function of poses and velocities. Trackers
//! combine these into a [`Correction`](crate::Correction); nothing in this
//! module touches a body.
//!
//! # Conventions
//!
//! - Angular velocities are world-frame rotation vectors in rad/s.
//! - Orientation prediction integrates angular velocity with the exponential
//!   map, applied on the left: `q(t+dt) = exp(omega * dt) * q(t)`.
//! - Euler angles follow nalgebra's roll/pitch/yaw convention (rotations
//!   about X, Y, Z composed as `Rz * Ry * Rx`).

use std::f64::consts::{PI, TAU};

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::types::{BodyState, Pose};

/// Fraction of the rotation error corrected per step in velocity mode.
pub const ANGULAR_DAMPING: f64 = 0.9;

/// Below this, the rotation axis is treated as undefined ("already aligned").
const DEGENERATE_ANGLE: f64 = 1e-12;

/// Offset of `owner` expressed in the local frame of `target`.
///
/// Returns `(position, rotation)` such that composing them onto the target's
/// pose reproduces the owner's pose:
///
/// ```text
/// position = target.rot⁻¹ · (owner.pos − target.pos)
/// rotation = target.rot⁻¹ · owner.rot
/// ```
#[must_use]
pub fn relative_offset(target: &Pose, owner: &Pose) -> (Vector3<f64>, UnitQuaternion<f64>) {
    let inv = target.rotation.inverse();
    (
        inv * (owner.position - target.position),
        inv * owner.rotation,
    )
}

/// Pose of a body `dt` seconds from now, assuming constant velocity.
#[must_use]
pub fn predict_pose(state: &BodyState, dt: f64) -> Pose {
    Pose {
        position: state.pose.position + state.twist.linear * dt,
        rotation: UnitQuaternion::from_scaled_axis(state.twist.angular * dt) * state.pose.rotation,
    }
}

/// Apply a frozen binding offset to a (predicted) target pose.
#[must_use]
pub fn apply_offset(
    target: &Pose,
    offset_position: &Vector3<f64>,
    offset_rotation: &UnitQuaternion<f64>,
) -> Pose {
    Pose {
        position: target.position + target.rotation * offset_position,
        rotation: target.rotation * offset_rotation,
    }
}

/// Scale `v` down so its magnitude does not exceed `max`.
///
/// Vectors already within the limit are returned unchanged. A negative
/// limit behaves like zero.
#[must_use]
pub fn clamp_magnitude(v: Vector3<f64>, max: f64) -> Vector3<f64> {
    let max = max.max(0.0);
    let norm = v.norm();
    if norm > max {
        v * (max / norm)
    } else {
        v
    }
}

/// Velocity that moves `current` onto `target` in one step of `dt`,
/// clamped to `limit`.
///
/// Returns zero for a non-positive or non-finite `dt`.
#[must_use]
pub fn clamped_velocity_towards(
    current: &Point3<f64>,
    target: &Point3<f64>,
    dt: f64,
    limit: f64,
) -> Vector3<f64> {
    if !(dt.is_finite() && dt > 0.0) {
        return Vector3::zeros();
    }
    clamp_magnitude((target - current) / dt, limit)
}

/// Wrap an angle in radians into `(-π, π]`.
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    let a = angle % TAU;
    if a > PI {
        a - TAU
    } else if a <= -PI {
        a + TAU
    } else {
        a
    }
}

/// Angular velocity that turns `current` toward `target` over `dt`.
///
/// The relative rotation `target · current⁻¹` is split into axis and angle,
/// the angle is wrapped into `(-π, π]`, and the result is
/// `axis · (0.9 · angle / dt)`. The 0.9 factor ([`ANGULAR_DAMPING`]) keeps
/// the body from overshooting when the physics step integrates the velocity.
///
/// When the two rotations already coincide the axis is undefined and the
/// zero vector is returned. A non-positive or non-finite `dt` also yields
/// zero.
///
/// # Example
///
/// ```
/// use sim_tracking::math::angular_delta_vector;
/// use nalgebra::{UnitQuaternion, Vector3};
///
/// let q = UnitQuaternion::from_euler_angles(0.4, -1.2, 2.0);
/// assert_eq!(angular_delta_vector(&q, &q, 0.02), Vector3::zeros());
/// ```
#[must_use]
pub fn angular_delta_vector(
    current: &UnitQuaternion<f64>,
    target: &UnitQuaternion<f64>,
    dt: f64,
) -> Vector3<f64> {
    if !(dt.is_finite() && dt > 0.0) {
        return Vector3::zeros();
    }

    let rel = target * current.inverse();
    let q = rel.quaternion();
    let (imag, w) = (q.imag(), q.w);
    let sin_half = imag.norm();
    if sin_half < DEGENERATE_ANGLE {
        return Vector3::zeros();
    }

    let axis = imag / sin_half;
    let angle = 2.0 * sin_half.atan2(w);
    axis * (ANGULAR_DAMPING * wrap_angle(angle) / dt)
}

/// Euler angles of the rotation taking `current` onto `target`, each wrapped
/// into `(-π, π]`.
///
/// This is the direct angular displacement used by instant rotation
/// tracking. [`euler_to_rotation`] inverts it.
#[must_use]
pub fn euler_delta(current: &UnitQuaternion<f64>, target: &UnitQuaternion<f64>) -> Vector3<f64> {
    let (roll, pitch, yaw) = (target * current.inverse()).euler_angles();
    Vector3::new(wrap_angle(roll), wrap_angle(pitch), wrap_angle(yaw))
}

/// Rotation described by roll/pitch/yaw angles in `v`.
#[must_use]
pub fn euler_to_rotation(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(v.x, v.y, v.z)
}

/// Arithmetic mean of a set of points, or `None` if there are none.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_position<I>(points: I) -> Option<Point3<f64>>
where
    I: IntoIterator<Item = Point3<f64>>,
{
    let (sum, count) = points
        .into_iter()
        .fold((Vector3::zeros(), 0usize), |(sum, n), p| (sum + p.coords, n + 1));

    (count > 0).then(|| Point3::from(sum / count as f64))
}
