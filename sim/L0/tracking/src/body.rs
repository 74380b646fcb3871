//! The body interface trackers read from and write to.
//!
//! Rigid bodies live in the host's physics engine. Trackers reach them only
//! through [`BodySet`], by [`BodyId`]. [`BodyWorld`] is a small reference
//! implementation with semi-implicit Euler integration, enough to drive a
//! tracking loop without an external engine.

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::trace;

use crate::error::TrackingError;
use crate::types::{BodyId, BodyState, Pose};

/// Access to the bodies a tracker controls and follows.
///
/// Writers return [`TrackingError::BodyNotFound`] for unknown IDs.
pub trait BodySet {
    /// Current pose and velocity of a body.
    fn state(&self, id: BodyId) -> Option<BodyState>;

    /// Whether the physics step applies gravity to this body.
    fn uses_gravity(&self, id: BodyId) -> bool;

    /// Global gravity acceleration (m/s²).
    fn gravity(&self) -> Vector3<f64>;

    /// Overwrite a body's position and orientation.
    fn set_pose(&mut self, id: BodyId, pose: Pose) -> crate::Result<()>;

    /// Overwrite a body's linear velocity.
    fn set_linear_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) -> crate::Result<()>;

    /// Overwrite a body's angular velocity.
    fn set_angular_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) -> crate::Result<()>;

    /// Set the angular speed ceiling the physics step enforces on a body.
    fn set_max_angular_speed(&mut self, id: BodyId, max: f64) -> crate::Result<()>;
}

/// A body stored in a [`BodyWorld`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBody {
    /// Pose and velocity.
    pub state: BodyState,
    /// Whether gravity accelerates this body.
    pub uses_gravity: bool,
    /// Angular speed ceiling (rad/s), enforced during integration.
    pub max_angular_speed: f64,
}

impl WorldBody {
    /// A body with gravity enabled and no angular speed ceiling.
    #[must_use]
    pub fn new(state: BodyState) -> Self {
        Self {
            state,
            uses_gravity: true,
            max_angular_speed: f64::INFINITY,
        }
    }

    /// Disable gravity for this body.
    #[must_use]
    pub fn without_gravity(mut self) -> Self {
        self.uses_gravity = false;
        self
    }
}

/// Minimal body container implementing [`BodySet`].
///
/// # Example
///
/// ```
/// use sim_tracking::{BodySet, BodyState, BodyWorld, Pose};
/// use nalgebra::{Point3, Vector3};
///
/// let mut world = BodyWorld::new(Vector3::new(0.0, 0.0, -9.81));
/// let id = world.add_body(BodyState::at_rest(Pose::from_position(Point3::new(0.0, 0.0, 1.0))));
///
/// world.integrate(0.1);
/// let state = world.state(id).unwrap();
/// assert!(state.pose.position.z < 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BodyWorld {
    bodies: HashMap<BodyId, WorldBody>,
    gravity: Vector3<f64>,
    next_id: u64,
}

impl BodyWorld {
    /// Create an empty world with the given gravity.
    #[must_use]
    pub fn new(gravity: Vector3<f64>) -> Self {
        Self {
            bodies: HashMap::new(),
            gravity,
            next_id: 0,
        }
    }

    /// Create an empty world without gravity.
    #[must_use]
    pub fn zero_gravity() -> Self {
        Self::new(Vector3::zeros())
    }

    /// Add a gravity-affected body and return its ID.
    pub fn add_body(&mut self, state: BodyState) -> BodyId {
        self.insert(WorldBody::new(state))
    }

    /// Add a fully described body and return its ID.
    pub fn insert(&mut self, body: WorldBody) -> BodyId {
        let id = BodyId::new(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, body);
        id
    }

    /// Remove a body, returning it if present.
    pub fn remove(&mut self, id: BodyId) -> Option<WorldBody> {
        self.bodies.remove(&id)
    }

    /// Get a body by ID.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&WorldBody> {
        self.bodies.get(&id)
    }

    /// Number of bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Check if the world has no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Advance every body by `dt` with semi-implicit Euler.
    ///
    /// Gravity is applied to the velocity first, the angular speed ceiling
    /// is enforced, then the pose is advanced with the new velocity.
    /// Orientation is integrated on the left, matching
    /// [`predict_pose`](crate::math::predict_pose).
    pub fn integrate(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        for body in self.bodies.values_mut() {
            let twist = &mut body.state.twist;
            if body.uses_gravity {
                twist.linear += self.gravity * dt;
            }
            twist.angular = crate::math::clamp_magnitude(twist.angular, body.max_angular_speed);

            let pose = &mut body.state.pose;
            pose.position += twist.linear * dt;
            pose.rotation = UnitQuaternion::from_scaled_axis(twist.angular * dt) * pose.rotation;
        }

        trace!(dt, bodies = self.bodies.len(), "integrated body world");
    }

    fn get_mut(&mut self, id: BodyId) -> crate::Result<&mut WorldBody> {
        self.bodies.get_mut(&id).ok_or(TrackingError::BodyNotFound(id))
    }
}

impl BodySet for BodyWorld {
    fn state(&self, id: BodyId) -> Option<BodyState> {
        self.bodies.get(&id).map(|b| b.state)
    }

    fn uses_gravity(&self, id: BodyId) -> bool {
        self.bodies.get(&id).is_some_and(|b| b.uses_gravity)
    }

    fn gravity(&self) -> Vector3<f64> {
        self.gravity
    }

    fn set_pose(&mut self, id: BodyId, pose: Pose) -> crate::Result<()> {
        self.get_mut(id)?.state.pose = pose;
        Ok(())
    }

    fn set_linear_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) -> crate::Result<()> {
        self.get_mut(id)?.state.twist.linear = velocity;
        Ok(())
    }

    fn set_angular_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) -> crate::Result<()> {
        self.get_mut(id)?.state.twist.angular = velocity;
        Ok(())
    }

    fn set_max_angular_speed(&mut self, id: BodyId, max: f64) -> crate::Result<()> {
        self.get_mut(id)?.max_angular_speed = max;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn at_rest_at(position: nalgebra::Point3<f64>) -> BodyState {
    BodyState::at_rest(Pose::from_position(position))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::types::Twist;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_add_and_lookup() {
        let mut world = BodyWorld::zero_gravity();
        let a = world.add_body(at_rest_at(Point3::new(1.0, 0.0, 0.0)));
        let b = world.add_body(at_rest_at(Point3::new(2.0, 0.0, 0.0)));

        assert_ne!(a, b);
        assert_eq!(world.len(), 2);
        assert_eq!(world.state(b).unwrap().pose.position.x, 2.0);
        assert!(world.state(BodyId::new(99)).is_none());
    }

    #[test]
    fn test_setters_report_missing_body() {
        let mut world = BodyWorld::zero_gravity();
        let missing = BodyId::new(5);
        assert_eq!(
            world.set_linear_velocity(missing, Vector3::x()),
            Err(TrackingError::BodyNotFound(missing))
        );
        assert!(world.set_pose(missing, Pose::identity()).is_err());
        assert!(!world.uses_gravity(missing));
    }

    #[test]
    fn test_integrate_gravity() {
        let mut world = BodyWorld::new(Vector3::new(0.0, 0.0, -10.0));
        let falling = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 10.0)));
        let floating = world.insert(WorldBody::new(at_rest_at(Point3::origin())).without_gravity());

        world.integrate(0.1);

        let s = world.state(falling).unwrap();
        assert_relative_eq!(s.twist.linear.z, -1.0, epsilon = 1e-12);
        assert_relative_eq!(s.pose.position.z, 9.9, epsilon = 1e-12);
        assert_eq!(world.state(floating).unwrap().pose.position, Point3::origin());
    }

    #[test]
    fn test_integrate_clamps_angular_speed() {
        let mut world = BodyWorld::zero_gravity();
        let id = world.add_body(BodyState::new(
            Pose::identity(),
            Twist::angular(Vector3::new(0.0, 0.0, 50.0)),
        ));
        world.set_max_angular_speed(id, 5.0).unwrap();

        world.integrate(0.01);

        let s = world.state(id).unwrap();
        assert_relative_eq!(s.twist.angular.norm(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(s.pose.rotation.angle(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_integrate_ignores_bad_dt() {
        let mut world = BodyWorld::new(Vector3::new(0.0, 0.0, -9.81));
        let id = world.add_body(at_rest_at(Point3::origin()));
        world.integrate(0.0);
        world.integrate(-1.0);
        assert_eq!(world.state(id).unwrap(), at_rest_at(Point3::origin()));
    }
}
