//! Feedforward actuator trajectories.
//!
//! Each controlled axis of the bench follows a sinusoidal reference through a
//! [`MotionPlanner`], which integrates a saturated tracking law one execution
//! interval at a time.

pub mod planner;

pub use planner::{advance, derivative, AxisLimits, MotionPlanner, PlannerError};
