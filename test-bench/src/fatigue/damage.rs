//! Eurocode 3 fatigue life and Palmgren-Miner damage accumulation.

use serde::{Deserialize, Serialize};
use simulator::structure::bench::SPECIMEN_AREA;

use super::rainflow::Cycle;

/// Cycles at the detail category reference stress.
const REFERENCE_CYCLES: f64 = 2e6;
/// Cycles at the constant-amplitude fatigue limit.
const KNEE_CYCLES: f64 = 5e6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueConfig {
    /// Detail category, the stress range at two million cycles [N/mm^2].
    pub detail_category: f64,
    /// Loaded cross-section [mm^2].
    pub section_area: f64,
    /// Floor of the stiffness retained by a fully damaged specimen, as a
    /// fraction of the undamaged modulus.
    pub residual_fraction: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            detail_category: 71.0,
            section_area: SPECIMEN_AREA,
            residual_fraction: 0.1,
        }
    }
}

/// S-N curve of EN 1993-1-9 for one detail category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnCurve {
    detail_category: f64,
}

impl SnCurve {
    pub fn new(detail_category: f64) -> Self {
        Self { detail_category }
    }

    pub fn detail_category(&self) -> f64 {
        self.detail_category
    }

    /// Constant-amplitude fatigue limit.
    pub fn constant_amplitude_limit(&self) -> f64 {
        0.737 * self.detail_category
    }

    /// Stress ranges below this never contribute damage.
    pub fn cut_off_limit(&self) -> f64 {
        0.405 * self.detail_category
    }

    /// Cycles to failure at `stress_range`; infinite below the cut-off.
    pub fn cycles_to_failure(&self, stress_range: f64) -> f64 {
        let dsc = self.detail_category;
        let dsd = self.constant_amplitude_limit();
        if stress_range >= dsd {
            REFERENCE_CYCLES * (dsc / stress_range).powi(3)
        } else if stress_range >= self.cut_off_limit() {
            KNEE_CYCLES * (dsd / stress_range).powi(5)
        } else {
            f64::INFINITY
        }
    }
}

/// Palmgren-Miner damage index of a force-range histogram.
pub fn miner_damage(cycles: &[Cycle], curve: &SnCurve, section_area: f64) -> f64 {
    cycles
        .iter()
        .map(|cycle| {
            let stress_range = cycle.range as f64 / section_area;
            cycle.count / curve.cycles_to_failure(stress_range)
        })
        .sum()
}

/// Modulus left after damage `damage`, never below the residual fraction.
pub fn effective_modulus(undamaged: f64, damage: f64, residual_fraction: f64) -> f64 {
    undamaged * (1.0 - damage).max(residual_fraction)
}
