//! Numerical kernels for the hybrid test bench twin.
//!
//! - [`integrator`]: adaptive Dormand-Prince integration over one control tick
//! - [`least_squares`]: bounded Levenberg-Marquardt used for model calibration
//! - [`stats`]: sample statistics for particle sets

pub mod integrator;
pub mod least_squares;
pub mod stats;

pub use integrator::{integrate, IntegrationError, IntegratorOptions};
pub use least_squares::{
    levenberg_marquardt, Bounds, LeastSquaresError, LeastSquaresOptions, LeastSquaresReport,
    Termination,
};
