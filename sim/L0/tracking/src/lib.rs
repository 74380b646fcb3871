//! Target tracking for rigid bodies.
//!
//! A [`Tracker`] makes one body (the owner) follow one or more target bodies
//! while preserving a fixed relative offset to each. Corrections are applied
//! either as velocities, so the physics step moves the owner and collisions
//! still resolve, or by overwriting the pose directly.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐  build   ┌───────────────────────────────┐
//! │   TrackerConfig   │ ───────► │ Tracker (owner + bindings)    │
//! └───────────────────┘          └───────────────┬───────────────┘
//!                                  first bind /  │  last unbind
//!                                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ TrackingRegistry                                            │
//! │   PerFixedStep: [A, C, ...]    PerFrame: [B, ...]           │
//! └───────────────────────────────┬─────────────────────────────┘
//!                                 │ tick(phase, dt)
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ BodySet (host physics engine, or BodyWorld)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Per-step algorithm
//!
//! For each binding the target pose is predicted one step ahead from its
//! velocity, then the binding's offset is applied to get a goal pose. Goal
//! positions are averaged; rotation deltas are summed. The resulting
//! correction is clamped, masked by the lock axes and written to the owner.
//!
//! # Layer 0 Crate
//!
//! No engine dependencies. Bodies are reached through the [`BodySet`] trait.
//!
//! # Quick Start
//!
//! ```
//! use sim_tracking::{BodySet, BodyState, BodyWorld, Pose, TrackerConfig, TrackingRegistry};
//! use nalgebra::Point3;
//!
//! let mut world = BodyWorld::zero_gravity();
//! let leader = world.add_body(BodyState::at_rest(Pose::from_position(Point3::origin())));
//! let follower = world.add_body(BodyState::at_rest(Pose::from_position(Point3::origin())));
//!
//! let registry = TrackingRegistry::new();
//! let tracker = TrackerConfig::default().build(follower, &registry).unwrap();
//!
//! // Follow one metre above the leader.
//! tracker
//!     .start_tracking(&world, leader, Some(nalgebra::Vector3::new(0.0, 0.0, 1.0)), None)
//!     .unwrap();
//!
//! for _ in 0..200 {
//!     registry.tick_fixed(0.02, &mut world);
//!     world.integrate(0.02);
//! }
//!
//! let z = world.state(follower).unwrap().pose.position.z;
//! assert!((z - 1.0).abs() < 1e-3);
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,       // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,           // mul_add style changes aren't always clearer
    clippy::neg_cmp_op_on_partial_ord,  // !(x > 0.0) is intentional for NaN rejection
    clippy::doc_markdown,
)]

pub mod body;
pub mod config;
pub mod error;
pub mod math;
pub mod registry;
pub mod tracker;
pub mod types;

pub use body::{BodySet, BodyWorld, WorldBody};
pub use config::TrackerConfig;
pub use error::{TrackingError, validate_timestep};
pub use registry::{TickReport, TrackingRegistry};
pub use tracker::{Correction, PositionCorrection, RotationCorrection, TargetBinding, Tracker};
pub use types::{BodyId, BodyState, LockAxes, Pose, Twist, TrackingMode, UpdatePhase};

/// Result type for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;
