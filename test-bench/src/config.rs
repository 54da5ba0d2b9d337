//! Twin service configuration.
//!
//! Stored as the `twin` document in [`shared::config_storage::ConfigStorage`].
//! Every field has a default, so a partial document only overrides what it
//! names.

use serde::{Deserialize, Serialize};
use shared::config_storage::{ConfigError, ConfigStorage};
use simulator::emulator::EmulatorConfig;
use thiserror::Error;

use crate::actuator::planner::DEFAULT_LIMIT_MARGIN;
pub use crate::calibration::{CalibrationConfig, CalibrationTarget};
pub use crate::estimation::EstimatorConfig;
pub use crate::fatigue::FatigueConfig;

/// Name of the configuration document.
pub const CONFIG_NAME: &str = "twin";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidConfig {
    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be finite and non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must lie in [0, 1], got {value}")]
    NotAFraction { field: &'static str, value: f64 },

    #[error("Estimator needs at least one particle")]
    NoParticles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    /// Tick period [s].
    pub execution_interval: f64,
    /// Initial horizontal load amplitude [N].
    pub horizontal_force_amplitude: f64,
    /// Initial vertical stroke amplitude [mm].
    pub vertical_displacement_amplitude: f64,
    /// Initial excitation periods [min].
    pub horizontal_period: f64,
    pub vertical_period: f64,
    /// Headroom of the planner limits over the reference peaks.
    pub limit_margin: f64,
    /// Stroke limit reported with every state [mm].
    pub max_vertical_displacement: f64,
    /// Drift beyond this fraction of the amplitude triggers a resync.
    pub drift_threshold: f64,
    /// Specimen modulus the twin starts from [N/mm^2].
    pub initial_specimen_modulus: f64,
    pub estimator: EstimatorConfig,
    pub calibration: CalibrationConfig,
    pub fatigue: FatigueConfig,
    pub emulator: EmulatorConfig,
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            execution_interval: 3.0,
            horizontal_force_amplitude: 100.0,
            vertical_displacement_amplitude: 20.0,
            horizontal_period: 2.0,
            vertical_period: 2.0,
            limit_margin: DEFAULT_LIMIT_MARGIN,
            max_vertical_displacement: 70.0,
            drift_threshold: 0.1,
            // Nominal value before the first calibration
            initial_specimen_modulus: 100e3,
            estimator: EstimatorConfig::default(),
            calibration: CalibrationConfig::default(),
            fatigue: FatigueConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}

impl TwinConfig {
    /// Load the stored configuration, or defaults when none is stored.
    pub fn load(storage: &ConfigStorage) -> Result<Self, ConfigError> {
        storage.get_or_default(CONFIG_NAME)
    }

    pub fn save(&self, storage: &ConfigStorage) -> Result<std::path::PathBuf, ConfigError> {
        storage.save(CONFIG_NAME, self)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        positive("execution_interval", self.execution_interval)?;
        positive("horizontal_period", self.horizontal_period)?;
        positive("vertical_period", self.vertical_period)?;
        positive("limit_margin", self.limit_margin)?;
        positive("initial_specimen_modulus", self.initial_specimen_modulus)?;
        positive("fatigue.detail_category", self.fatigue.detail_category)?;
        positive("fatigue.section_area", self.fatigue.section_area)?;
        non_negative("horizontal_force_amplitude", self.horizontal_force_amplitude)?;
        non_negative(
            "vertical_displacement_amplitude",
            self.vertical_displacement_amplitude,
        )?;
        non_negative("max_vertical_displacement", self.max_vertical_displacement)?;
        non_negative("drift_threshold", self.drift_threshold)?;
        non_negative(
            "estimator.position_noise_fraction",
            self.estimator.position_noise_fraction,
        )?;
        non_negative(
            "estimator.velocity_noise_fraction",
            self.estimator.velocity_noise_fraction,
        )?;
        non_negative(
            "estimator.observation_noise_fraction",
            self.estimator.observation_noise_fraction,
        )?;
        if self.estimator.particles == 0 {
            return Err(InvalidConfig::NoParticles);
        }
        let residual = self.fatigue.residual_fraction;
        if !(0.0..=1.0).contains(&residual) {
            return Err(InvalidConfig::NotAFraction {
                field: "fatigue.residual_fraction",
                value: residual,
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), InvalidConfig> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(InvalidConfig::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), InvalidConfig> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(InvalidConfig::Negative { field, value })
    }
}
