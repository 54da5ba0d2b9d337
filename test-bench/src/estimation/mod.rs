//! State estimation for the actuator axes.

pub mod particle_filter;

pub use particle_filter::{
    estimate, AxisEstimator, Estimate, EstimatorConfig, EstimatorError, ParticleCloud,
};
