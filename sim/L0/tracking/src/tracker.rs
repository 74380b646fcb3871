//! Per-body tracking controller.
//!
//! A [`Tracker`] drives one owner body toward the averaged pose of up to
//! `max_tracked` target bodies, each seen through a frozen offset.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──► idle ──start_tracking──► active (registered in its phase)
//!            ▲                          │
//!            └──── last stop_tracking ──┘
//! ```
//!
//! Trackers are shared handles (`Rc<Tracker>`) owned by whoever built them.
//! The [`TrackingRegistry`] only keeps weak references, and dropping the last
//! handle deregisters the tracker.
//!
//! # Step
//!
//! Each step, for every binding:
//!
//! 1. Predict the target one `dt` ahead (linear velocity, exponential-map
//!    angular velocity).
//! 2. Apply the binding's offset to get that binding's goal pose.
//!
//! Goal positions are averaged. Rotation deltas are summed per binding, a
//! linear stand-in for a rotational mean that is exact for one target.
//! The result is clamped, masked by the lock axes, and written to the owner.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, trace};

use crate::body::BodySet;
use crate::config::TrackerConfig;
use crate::error::TrackingError;
use crate::math;
use crate::registry::TrackingRegistry;
use crate::types::{BodyId, TrackingMode, UpdatePhase};

/// One target a tracker follows, with the offset frozen at bind time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetBinding {
    /// The followed body.
    pub target: BodyId,
    /// Owner position in the target's local frame.
    pub offset_position: Vector3<f64>,
    /// Owner orientation relative to the target.
    pub offset_rotation: UnitQuaternion<f64>,
}

impl TargetBinding {
    /// Create a binding.
    #[must_use]
    pub const fn new(
        target: BodyId,
        offset_position: Vector3<f64>,
        offset_rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            target,
            offset_position,
            offset_rotation,
        }
    }
}

/// Linear part of a [`Correction`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionCorrection {
    /// Replace the owner's linear velocity.
    Velocity(Vector3<f64>),
    /// Move the owner by this displacement.
    Displacement(Vector3<f64>),
}

/// Angular part of a [`Correction`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotationCorrection {
    /// Replace the owner's angular velocity and cap its angular speed.
    Velocity {
        /// New angular velocity (rad/s).
        angular: Vector3<f64>,
        /// Angular speed ceiling (rad/s).
        max_speed: f64,
    },
    /// Rotate the owner by these roll/pitch/yaw angles (rad).
    Rotation(Vector3<f64>),
}

/// The change one tracker step makes to its owner.
///
/// Produced by [`Tracker::compute_correction`] without touching any body,
/// then written by [`Correction::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    /// Linear correction.
    pub position: PositionCorrection,
    /// Angular correction.
    pub rotation: RotationCorrection,
}

impl Correction {
    /// Check that every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        let position = match self.position {
            PositionCorrection::Velocity(v) | PositionCorrection::Displacement(v) => v,
        };
        let rotation = match self.rotation {
            RotationCorrection::Velocity { angular, .. } => angular,
            RotationCorrection::Rotation(euler) => euler,
        };
        position.iter().chain(rotation.iter()).all(|x| x.is_finite())
    }

    /// Write this correction to `owner`.
    ///
    /// Instant components are composed onto the owner's current pose in one
    /// [`BodySet::set_pose`] call; velocity components overwrite the owner's
    /// velocities.
    pub fn apply<B: BodySet + ?Sized>(&self, owner: BodyId, bodies: &mut B) -> crate::Result<()> {
        let displacement = match self.position {
            PositionCorrection::Displacement(d) => Some(d),
            PositionCorrection::Velocity(_) => None,
        };
        let rotation = match self.rotation {
            RotationCorrection::Rotation(euler) => Some(euler),
            RotationCorrection::Velocity { .. } => None,
        };

        if displacement.is_some() || rotation.is_some() {
            let mut pose = bodies
                .state(owner)
                .ok_or(TrackingError::BodyNotFound(owner))?
                .pose;
            if let Some(d) = displacement {
                pose.position += d;
            }
            if let Some(euler) = rotation {
                pose.rotation = math::euler_to_rotation(&euler) * pose.rotation;
            }
            bodies.set_pose(owner, pose)?;
        }

        if let PositionCorrection::Velocity(v) = self.position {
            bodies.set_linear_velocity(owner, v)?;
        }
        if let RotationCorrection::Velocity { angular, max_speed } = self.rotation {
            bodies.set_max_angular_speed(owner, max_speed)?;
            bodies.set_angular_velocity(owner, angular)?;
        }

        Ok(())
    }
}

/// Tracking controller for one owner body.
///
/// # Example
///
/// ```
/// use sim_tracking::{BodySet, BodyState, BodyWorld, Pose, TrackerConfig, TrackingRegistry};
/// use nalgebra::Point3;
///
/// let mut world = BodyWorld::zero_gravity();
/// let anchor = world.add_body(BodyState::at_rest(Pose::from_position(Point3::new(0.0, 0.0, 5.0))));
/// let follower = world.add_body(BodyState::default());
///
/// let registry = TrackingRegistry::new();
/// let tracker = TrackerConfig::default().build(follower, &registry).unwrap();
///
/// // Follow the anchor exactly (zero offset).
/// tracker
///     .start_tracking_with_offsets(anchor, nalgebra::Vector3::zeros(), nalgebra::UnitQuaternion::identity())
///     .unwrap();
/// assert!(registry.contains(&tracker));
///
/// registry.tick_fixed(0.1, &mut world);
/// let v = world.state(follower).unwrap().twist.linear;
/// assert!((v.z - 10.0).abs() < 1e-9);
/// ```
pub struct Tracker {
    owner: BodyId,
    config: TrackerConfig,
    bindings: RefCell<Vec<TargetBinding>>,
    registry: TrackingRegistry,
    this: Weak<Tracker>,
}

impl Tracker {
    /// Build a tracker for `owner`.
    ///
    /// The tracker starts idle; it joins `registry` when its first target
    /// is bound.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        owner: BodyId,
        config: TrackerConfig,
        registry: &TrackingRegistry,
    ) -> crate::Result<Rc<Self>> {
        config.validate()?;
        Ok(Rc::new_cyclic(|this| Self {
            owner,
            config,
            bindings: RefCell::new(Vec::new()),
            registry: registry.clone(),
            this: this.clone(),
        }))
    }

    /// The controlled body.
    #[must_use]
    pub fn owner(&self) -> BodyId {
        self.owner
    }

    /// The tracker's configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The phase this tracker registers under.
    #[must_use]
    pub fn phase(&self) -> UpdatePhase {
        self.config.phase
    }

    /// Whether any target is bound.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        !self.bindings.borrow().is_empty()
    }

    /// Number of bound targets.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// Whether no further targets can be bound.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count() >= self.config.max_tracked
    }

    /// Binding at `index`, in bind order.
    #[must_use]
    pub fn binding(&self, index: usize) -> Option<TargetBinding> {
        self.bindings.borrow().get(index).copied()
    }

    /// Snapshot of all bindings, in bind order.
    #[must_use]
    pub fn bindings(&self) -> Vec<TargetBinding> {
        self.bindings.borrow().clone()
    }

    /// Whether `target` is bound.
    #[must_use]
    pub fn tracks(&self, target: BodyId) -> bool {
        self.bindings.borrow().iter().any(|b| b.target == target)
    }

    /// Whether the registry currently steps this tracker.
    ///
    /// This can be false for a non-empty tracker whose registry entry was
    /// replaced by another tracker for the same owner.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registry.contains_entry(&self.this)
    }

    /// Start (or re-bind) tracking `target`.
    ///
    /// Offsets left as `None` are taken from the current relative pose of
    /// the owner and the target, so tracking starts without a jump.
    ///
    /// # Errors
    ///
    /// - [`TrackingError::CapacityExceeded`] if `target` is new and the
    ///   tracker is full.
    /// - [`TrackingError::BodyNotFound`] if an offset must be derived and the
    ///   owner or target is missing from `bodies`.
    ///
    /// Nothing changes on error.
    pub fn start_tracking<B: BodySet + ?Sized>(
        &self,
        bodies: &B,
        target: BodyId,
        offset_position: Option<Vector3<f64>>,
        offset_rotation: Option<UnitQuaternion<f64>>,
    ) -> crate::Result<()> {
        if !self.tracks(target) && self.is_full() {
            return Err(self.capacity_error());
        }

        let (offset_position, offset_rotation) = match (offset_position, offset_rotation) {
            (Some(position), Some(rotation)) => (position, rotation),
            (position, rotation) => {
                let owner = bodies
                    .state(self.owner)
                    .ok_or(TrackingError::BodyNotFound(self.owner))?;
                let followed = bodies
                    .state(target)
                    .ok_or(TrackingError::BodyNotFound(target))?;
                let (derived_position, derived_rotation) =
                    math::relative_offset(&followed.pose, &owner.pose);
                (
                    position.unwrap_or(derived_position),
                    rotation.unwrap_or(derived_rotation),
                )
            }
        };

        self.start_tracking_with_offsets(target, offset_position, offset_rotation)
    }

    /// Start (or re-bind) tracking `target` with explicit offsets.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::CapacityExceeded`] if `target` is new and the
    /// tracker is full; nothing changes in that case.
    pub fn start_tracking_with_offsets(
        &self,
        target: BodyId,
        offset_position: Vector3<f64>,
        offset_rotation: UnitQuaternion<f64>,
    ) -> crate::Result<()> {
        let binding = TargetBinding::new(target, offset_position, offset_rotation);

        let first = {
            let mut bindings = self.bindings.borrow_mut();
            if let Some(existing) = bindings.iter_mut().find(|b| b.target == target) {
                *existing = binding;
                debug!(owner = %self.owner, %target, "re-bound tracking offsets");
                return Ok(());
            }
            if bindings.len() >= self.config.max_tracked {
                return Err(self.capacity_error());
            }
            bindings.push(binding);
            bindings.len() == 1
        };

        if first {
            self.registry
                .insert(self.owner, self.this.clone(), self.phase());
        }
        debug!(owner = %self.owner, %target, count = self.count(), "started tracking");
        Ok(())
    }

    /// Stop tracking `target`. Does nothing if it is not bound.
    ///
    /// Removing the last binding deregisters the tracker.
    pub fn stop_tracking(&self, target: BodyId) {
        let now_empty = {
            let mut bindings = self.bindings.borrow_mut();
            let before = bindings.len();
            bindings.retain(|b| b.target != target);
            if bindings.len() != before {
                debug!(owner = %self.owner, %target, "stopped tracking");
            }
            bindings.is_empty()
        };

        if now_empty {
            self.registry.remove_entry(&self.this);
        }
    }

    /// Stop tracking every target and deregister.
    pub fn stop_all_tracking(&self) {
        let removed = std::mem::take(&mut *self.bindings.borrow_mut());
        if !removed.is_empty() {
            debug!(owner = %self.owner, count = removed.len(), "stopped all tracking");
        }
        self.registry.remove_entry(&self.this);
    }

    /// Compute this step's correction without writing anything.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no bindings, or a
    /// `dt` that is not positive and finite.
    ///
    /// # Errors
    ///
    /// - [`TrackingError::BodyNotFound`] if the owner or a target is missing.
    /// - [`TrackingError::Diverged`] if the correction is not finite.
    pub fn compute_correction<B: BodySet + ?Sized>(
        &self,
        dt: f64,
        bodies: &B,
    ) -> crate::Result<Option<Correction>> {
        if !(dt.is_finite() && dt > 0.0) {
            return Ok(None);
        }

        let bindings = self.bindings.borrow();
        if bindings.is_empty() {
            return Ok(None);
        }

        let owner = bodies
            .state(self.owner)
            .ok_or(TrackingError::BodyNotFound(self.owner))?;

        let mut goals = Vec::with_capacity(bindings.len());
        let mut rotation_delta = Vector3::zeros();
        for binding in bindings.iter() {
            let followed = bodies
                .state(binding.target)
                .ok_or(TrackingError::BodyNotFound(binding.target))?;
            let predicted = math::predict_pose(&followed, dt);
            let goal =
                math::apply_offset(&predicted, &binding.offset_position, &binding.offset_rotation);

            rotation_delta += match self.config.rotation_mode {
                TrackingMode::Velocity => {
                    math::angular_delta_vector(&owner.pose.rotation, &goal.rotation, dt)
                }
                TrackingMode::Instant => math::euler_delta(&owner.pose.rotation, &goal.rotation),
            };
            goals.push(goal.position);
        }

        let Some(average) = math::average_position(goals) else {
            return Ok(None);
        };

        let position = match self.config.position_mode {
            TrackingMode::Velocity => {
                let mut delta = math::clamped_velocity_towards(
                    &owner.pose.position,
                    &average,
                    dt,
                    self.config.linear_force_limit,
                );
                // Added after clamping, as acceleration·dt² on a velocity.
                if bodies.uses_gravity(self.owner) {
                    delta -= bodies.gravity() * dt * dt;
                }
                PositionCorrection::Velocity(self.config.position_lock.apply(delta))
            }
            TrackingMode::Instant => PositionCorrection::Displacement(
                self.config.position_lock.apply(average - owner.pose.position),
            ),
        };

        let rotation_delta = self.config.rotation_lock.apply(rotation_delta);
        let rotation = match self.config.rotation_mode {
            TrackingMode::Velocity => RotationCorrection::Velocity {
                angular: rotation_delta,
                max_speed: self.config.angular_force_limit,
            },
            TrackingMode::Instant => RotationCorrection::Rotation(rotation_delta),
        };

        let correction = Correction { position, rotation };
        if !correction.is_finite() {
            return Err(TrackingError::diverged(format!(
                "non-finite correction for {}",
                self.owner
            )));
        }

        trace!(owner = %self.owner, ?correction, "computed correction");
        Ok(Some(correction))
    }

    /// Advance the tracker by `dt`: compute a correction and apply it.
    ///
    /// A `dt` that is not positive and finite, or an empty tracker, is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Tracker::compute_correction`] and
    /// [`Correction::apply`]. Nothing is written if the correction could not
    /// be computed.
    pub fn step<B: BodySet + ?Sized>(&self, dt: f64, bodies: &mut B) -> crate::Result<()> {
        match self.compute_correction(dt, &*bodies)? {
            Some(correction) => correction.apply(self.owner, bodies),
            None => Ok(()),
        }
    }

    fn capacity_error(&self) -> TrackingError {
        TrackingError::CapacityExceeded {
            max_tracked: self.config.max_tracked,
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.registry.detach(&self.this);
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .field("bindings", &self.bindings.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::{BodyWorld, WorldBody, at_rest_at};
    use crate::types::{BodyState, LockAxes, Pose, Twist};
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use std::f64::consts::FRAC_PI_2;

    fn identity_offsets() -> (Vector3<f64>, UnitQuaternion<f64>) {
        (Vector3::zeros(), UnitQuaternion::identity())
    }

    fn bind(tracker: &Tracker, target: BodyId) -> crate::Result<()> {
        let (p, r) = identity_offsets();
        tracker.start_tracking_with_offsets(target, p, r)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let registry = TrackingRegistry::new();
        let config = TrackerConfig::default().with_max_tracked(0);
        let err = Tracker::new(BodyId::new(0), config, &registry).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidConfig { .. }));
    }

    #[test]
    fn test_first_binding_registers_last_removal_deregisters() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(2)
            .build(BodyId::new(0), &registry)
            .unwrap();

        assert!(!tracker.is_tracking());
        assert!(!registry.contains(&tracker));

        bind(&tracker, BodyId::new(1)).unwrap();
        bind(&tracker, BodyId::new(2)).unwrap();
        assert!(tracker.is_tracking());
        assert_eq!(tracker.phase(), UpdatePhase::PerFixedStep);
        assert_eq!(registry.phase_of(&tracker), Some(tracker.phase()));
        assert_eq!(registry.len(UpdatePhase::PerFixedStep), 1);

        tracker.stop_tracking(BodyId::new(1));
        assert!(registry.contains(&tracker));

        tracker.stop_tracking(BodyId::new(2));
        assert!(!tracker.is_tracking());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebind_updates_offsets_in_place() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(3)
            .build(BodyId::new(0), &registry)
            .unwrap();
        bind(&tracker, BodyId::new(1)).unwrap();
        bind(&tracker, BodyId::new(2)).unwrap();

        let offset = Vector3::new(0.0, 1.0, 0.0);
        tracker
            .start_tracking_with_offsets(BodyId::new(1), offset, UnitQuaternion::identity())
            .unwrap();

        assert_eq!(tracker.count(), 2);
        let first = tracker.binding(0).unwrap();
        assert_eq!(first.target, BodyId::new(1));
        assert_eq!(first.offset_position, offset);
    }

    #[test]
    fn test_rebind_allowed_when_full() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(BodyId::new(0), &registry).unwrap();
        bind(&tracker, BodyId::new(1)).unwrap();
        assert!(tracker.is_full());
        assert!(bind(&tracker, BodyId::new(1)).is_ok());
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_capacity_exceeded_leaves_state_unchanged() {
        let registry = TrackingRegistry::new();
        let max = 3;
        let tracker = TrackerConfig::multi_target(max)
            .build(BodyId::new(0), &registry)
            .unwrap();

        for i in 1..=max as u64 {
            bind(&tracker, BodyId::new(i)).unwrap();
            assert!(tracker.count() <= max);
        }
        let before = tracker.bindings();

        let err = bind(&tracker, BodyId::new(99)).unwrap_err();
        assert_eq!(err, TrackingError::CapacityExceeded { max_tracked: max });
        assert_eq!(tracker.count(), max);
        assert_eq!(tracker.bindings(), before);
        assert!(!tracker.tracks(BodyId::new(99)));
    }

    #[test]
    fn test_stop_tracking_unbound_is_noop() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(BodyId::new(0), &registry).unwrap();
        bind(&tracker, BodyId::new(1)).unwrap();

        tracker.stop_tracking(BodyId::new(42));
        assert_eq!(tracker.count(), 1);
        assert!(registry.contains(&tracker));

        // Also harmless on an idle tracker.
        let idle = TrackerConfig::default().build(BodyId::new(5), &registry).unwrap();
        idle.stop_tracking(BodyId::new(1));
        assert_eq!(registry.len(UpdatePhase::PerFixedStep), 1);
    }

    #[test]
    fn test_stop_all_tracking() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(4)
            .with_phase(UpdatePhase::PerFrame)
            .build(BodyId::new(0), &registry)
            .unwrap();
        for i in 1..=4 {
            bind(&tracker, BodyId::new(i)).unwrap();
        }

        tracker.stop_all_tracking();
        assert_eq!(tracker.count(), 0);
        assert!(!registry.contains(&tracker));
        assert_eq!(registry.len(UpdatePhase::PerFrame), 0);
    }

    #[test]
    fn test_start_tracking_derives_offsets() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::at_rest(Pose::new(
            Point3::new(1.0, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        )));
        let owner = world.add_body(at_rest_at(Point3::new(1.0, 3.0, 0.0)));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();
        tracker.start_tracking(&world, target, None, None).unwrap();

        let binding = tracker.binding(0).unwrap();
        // World +Y is the target's local +X.
        assert_relative_eq!(binding.offset_position, Vector3::new(3.0, 0.0, 0.0), epsilon = 1e-12);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -FRAC_PI_2);
        assert!(binding.offset_rotation.angle_to(&expected) < 1e-6);
    }

    #[test]
    fn test_start_tracking_keeps_given_offset() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 2.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();
        let offset = Vector3::new(1.0, 1.0, 1.0);
        tracker
            .start_tracking(&world, target, Some(offset), None)
            .unwrap();

        let binding = tracker.binding(0).unwrap();
        assert_eq!(binding.offset_position, offset);
        assert_eq!(binding.offset_rotation, UnitQuaternion::identity());
    }

    #[test]
    fn test_start_tracking_missing_body() {
        let mut world = BodyWorld::zero_gravity();
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();
        let missing = BodyId::new(77);

        let err = tracker.start_tracking(&world, missing, None, None).unwrap_err();
        assert_eq!(err, TrackingError::BodyNotFound(missing));
        assert!(!tracker.is_tracking());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_scenario_clamped_velocity() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 5.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default()
            .with_limits(10.0, 20.0)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, target).unwrap();

        tracker.step(0.1, &mut world).unwrap();

        let v = world.state(owner).unwrap().twist.linear;
        assert_relative_eq!(v, Vector3::new(0.0, 0.0, 10.0), epsilon = 1e-12);
    }

    #[test]
    fn test_scenario_two_target_average() {
        let mut world = BodyWorld::zero_gravity();
        let a = world.add_body(at_rest_at(Point3::new(2.0, 0.0, 0.0)));
        let b = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 2.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(2)
            .with_limits(f64::INFINITY, 20.0)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, a).unwrap();
        bind(&tracker, b).unwrap();

        let dt = 0.5;
        let correction = tracker.compute_correction(dt, &world).unwrap().unwrap();
        let PositionCorrection::Velocity(v) = correction.position else {
            panic!("expected velocity correction");
        };
        // avg = (1, 0, 1)
        assert_relative_eq!(v * dt, Vector3::new(1.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_identical_targets_average_to_same_pose() {
        let mut world = BodyWorld::zero_gravity();
        let p = Point3::new(0.3, -1.2, 4.0);
        let a = world.add_body(at_rest_at(p));
        let b = world.add_body(at_rest_at(p));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(2)
            .with_modes(TrackingMode::Instant, TrackingMode::Instant)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, a).unwrap();
        bind(&tracker, b).unwrap();

        tracker.step(0.02, &mut world).unwrap();
        assert_relative_eq!(
            world.state(owner).unwrap().pose.position.coords,
            p.coords,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_prediction_leads_moving_target() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::new(
            Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
            Twist::linear(Vector3::new(2.0, 0.0, 0.0)),
        ));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::kinematic().build(owner, &registry).unwrap();
        bind(&tracker, target).unwrap();

        tracker.step(0.5, &mut world).unwrap();
        // 1 + 2 * 0.5
        assert_relative_eq!(world.state(owner).unwrap().pose.position.x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_offset_follows_target_rotation() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        )));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::kinematic().build(owner, &registry).unwrap();
        tracker
            .start_tracking_with_offsets(target, Vector3::x(), UnitQuaternion::identity())
            .unwrap();

        tracker.step(0.02, &mut world).unwrap();

        let pose = world.state(owner).unwrap().pose;
        assert_relative_eq!(pose.position.coords, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let goal = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        assert!(pose.rotation.angle_to(&goal) < 1e-6);
    }

    #[test]
    fn test_velocity_rotation_sets_ceiling() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5),
        )));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default()
            .with_limits(10.0, 3.0)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, target).unwrap();

        let dt = 0.1;
        tracker.step(dt, &mut world).unwrap();

        let body = world.body(owner).unwrap();
        assert_eq!(body.max_angular_speed, 3.0);
        assert_relative_eq!(
            body.state.twist.angular,
            Vector3::new(0.0, 0.9 * 0.5 / dt, 0.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_gravity_term_added_after_clamp() {
        let mut world = BodyWorld::new(Vector3::new(0.0, 0.0, -10.0));
        let target = world.insert(WorldBody::new(at_rest_at(Point3::new(0.0, 0.0, 5.0))).without_gravity());
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();
        bind(&tracker, target).unwrap();

        tracker.step(0.1, &mut world).unwrap();

        // clamp to 10, then -g * dt² = +0.1
        let v = world.state(owner).unwrap().twist.linear;
        assert_relative_eq!(v.z, 10.1, epsilon = 1e-12);
    }

    #[test]
    fn test_locks_zero_axes_across_steps() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::new(
            Pose::new(Point3::new(1.0, 2.0, 3.0), UnitQuaternion::from_euler_angles(0.4, 0.3, 0.2)),
            Twist::new(Vector3::new(0.5, -0.5, 0.1), Vector3::new(0.2, 0.1, -0.3)),
        ));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default()
            .with_position_lock(LockAxes::X)
            .with_rotation_lock(LockAxes::X)
            .with_limits(100.0, 100.0)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, target).unwrap();

        for _ in 0..20 {
            let correction = tracker.compute_correction(0.05, &world).unwrap().unwrap();
            let PositionCorrection::Velocity(v) = correction.position else {
                panic!("expected velocity correction");
            };
            let RotationCorrection::Velocity { angular, .. } = correction.rotation else {
                panic!("expected velocity correction");
            };
            assert_eq!(v.x, 0.0);
            assert_eq!(angular.x, 0.0);
            assert!(v.y != 0.0 || v.z != 0.0);

            correction.apply(owner, &mut world).unwrap();
            let state = world.state(owner).unwrap();
            assert_eq!(state.twist.linear.x, 0.0);
            assert_eq!(state.twist.angular.x, 0.0);

            world.integrate(0.05);
        }
        assert_eq!(world.state(owner).unwrap().pose.position.x, 0.0);
    }

    #[test]
    fn test_instant_position_lock() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(at_rest_at(Point3::new(1.0, 2.0, 3.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::kinematic()
            .with_position_lock(LockAxes::X | LockAxes::Z)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, target).unwrap();

        tracker.step(0.02, &mut world).unwrap();
        assert_eq!(
            world.state(owner).unwrap().pose.position,
            Point3::new(0.0, 2.0, 0.0)
        );
    }

    #[test]
    fn test_step_no_op_on_bad_dt_or_empty() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 5.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();

        // Empty tracker.
        tracker.step(0.1, &mut world).unwrap();
        assert_eq!(world.state(owner).unwrap(), at_rest_at(Point3::origin()));

        bind(&tracker, target).unwrap();
        for dt in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            tracker.step(dt, &mut world).unwrap();
            assert_eq!(world.state(owner).unwrap(), at_rest_at(Point3::origin()));
        }
    }

    #[test]
    fn test_step_missing_target_writes_nothing() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(at_rest_at(Point3::new(0.0, 0.0, 5.0)));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(owner, &registry).unwrap();
        bind(&tracker, target).unwrap();
        world.remove(target);

        let err = tracker.step(0.1, &mut world).unwrap_err();
        assert_eq!(err, TrackingError::BodyNotFound(target));
        assert_eq!(world.state(owner).unwrap(), at_rest_at(Point3::origin()));
    }

    #[test]
    fn test_drop_deregisters() {
        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::default().build(BodyId::new(0), &registry).unwrap();
        bind(&tracker, BodyId::new(1)).unwrap();
        assert_eq!(registry.len(UpdatePhase::PerFixedStep), 1);

        drop(tracker);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rotation_deltas_summed_over_targets() {
        let mut world = BodyWorld::zero_gravity();
        let pitched = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5),
        )));
        let yawed = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3),
        )));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::multi_target(2).build(owner, &registry).unwrap();
        bind(&tracker, pitched).unwrap();
        bind(&tracker, yawed).unwrap();

        let dt = 0.1;
        let correction = tracker.compute_correction(dt, &world).unwrap().unwrap();
        let RotationCorrection::Velocity { angular, .. } = correction.rotation else {
            panic!("expected velocity correction");
        };
        // Sum, not mean: 0.9·0.5/0.1 about Y plus 0.9·0.3/0.1 about Z.
        assert_relative_eq!(angular, Vector3::new(0.0, 4.5, 2.7), epsilon = 1e-9);

        // The same rotation twice doubles the delta.
        let twin = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5),
        )));
        tracker.stop_tracking(yawed);
        bind(&tracker, twin).unwrap();
        let correction = tracker.compute_correction(dt, &world).unwrap().unwrap();
        let RotationCorrection::Velocity { angular, .. } = correction.rotation else {
            panic!("expected velocity correction");
        };
        assert_relative_eq!(angular, Vector3::new(0.0, 9.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_instant_rotation_lock() {
        let mut world = BodyWorld::zero_gravity();
        let target = world.add_body(BodyState::at_rest(Pose::new(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.4, 0.3, 0.2),
        )));
        let owner = world.add_body(at_rest_at(Point3::origin()));

        let registry = TrackingRegistry::new();
        let tracker = TrackerConfig::kinematic()
            .with_rotation_lock(LockAxes::X)
            .build(owner, &registry)
            .unwrap();
        bind(&tracker, target).unwrap();

        for step in 0..3 {
            let correction = tracker.compute_correction(0.02, &world).unwrap().unwrap();
            let RotationCorrection::Rotation(euler) = correction.rotation else {
                panic!("expected instant rotation");
            };
            assert_eq!(euler.x, 0.0);
            correction.apply(owner, &mut world).unwrap();

            if step == 0 {
                assert_relative_eq!(euler, Vector3::new(0.0, 0.3, 0.2), epsilon = 1e-9);
                let rotation = world.state(owner).unwrap().pose.rotation;
                let expected = UnitQuaternion::from_euler_angles(0.0, 0.3, 0.2);
                assert!(rotation.angle_to(&expected) < 1e-6);
            }
        }
    }

    #[test]
    fn test_replaced_tracker_is_not_registered() {
        let registry = TrackingRegistry::new();
        let owner = BodyId::new(0);
        let first = TrackerConfig::default().build(owner, &registry).unwrap();
        let second = TrackerConfig::default().build(owner, &registry).unwrap();

        bind(&first, BodyId::new(1)).unwrap();
        assert!(first.is_registered());

        bind(&second, BodyId::new(2)).unwrap();
        assert!(first.is_tracking());
        assert!(!first.is_registered());
        assert!(second.is_registered());
        assert_eq!(registry.len(UpdatePhase::PerFixedStep), 1);

        second.stop_all_tracking();
        assert!(!second.is_registered());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_correction_is_finite() {
        let ok = Correction {
            position: PositionCorrection::Velocity(Vector3::x()),
            rotation: RotationCorrection::Rotation(Vector3::zeros()),
        };
        assert!(ok.is_finite());

        let bad = Correction {
            position: PositionCorrection::Displacement(Vector3::zeros()),
            rotation: RotationCorrection::Velocity {
                angular: Vector3::new(f64::NAN, 0.0, 0.0),
                max_speed: 1.0,
            },
        };
        assert!(!bad.is_finite());
    }
}
