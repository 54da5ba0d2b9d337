//! Online model calibration.

pub mod calibrator;

pub use calibrator::{
    CalibrationConfig, CalibrationError, CalibrationOutcome, CalibrationState, CalibrationTarget,
    Calibrator,
};
