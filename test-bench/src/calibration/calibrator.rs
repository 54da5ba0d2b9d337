//! Online re-fit of structural model parameters against bench readings.
//!
//! The calibrator drives the model with the actuator inputs the bench actually
//! applied, then adjusts the configured element parameters until the model's
//! actuator response matches the observed one in the least-squares sense.

use bench_math::{levenberg_marquardt, Bounds, LeastSquaresError, LeastSquaresOptions};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use simulator::structure::bench::{self, HORIZONTAL_ACTUATOR, SPECIMEN_ELEMENT, VERTICAL_ACTUATOR};
use simulator::structure::{ElementId, ModelError, SolverFailure, StructuralModel};
use thiserror::Error;
use tracing::{debug, info};

/// Squared residual norm charged for a candidate the model cannot solve.
pub const PENALTY_COST: f64 = 1e6;

/// Relative difference step used when the fit is unbounded.
pub const UNBOUNDED_DIFF_STEP: f64 = 0.1;

const RESPONSE_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("No calibration targets configured")]
    NoTargets,

    #[error("{targets} calibration targets but {bounds} bounds")]
    BoundsMismatch { targets: usize, bounds: usize },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Least squares failed: {0}")]
    LeastSquares(#[from] LeastSquaresError),
}

/// One element parameter re-fitted by the calibrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTarget {
    pub element: ElementId,
    /// `"E"`, `"A"` or `"I"`.
    pub parameter: String,
}

impl CalibrationTarget {
    pub fn new(element: ElementId, parameter: &str) -> Self {
        Self {
            element,
            parameter: parameter.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,
    pub targets: Vec<CalibrationTarget>,
    /// `[lower, upper]` per target. Absent means unbounded.
    pub bounds: Option<Vec<[f64; 2]>>,
    pub max_iterations: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            targets: vec![CalibrationTarget::new(SPECIMEN_ELEMENT, "E")],
            bounds: None,
            max_iterations: 50,
        }
    }
}

/// Parameter vector and residual of the most recent fit.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub parameters: DVector<f64>,
    pub bounds: Bounds,
    pub last_residual: Option<DVector<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub cost: f64,
    pub initial_cost: f64,
    pub parameters: Vec<f64>,
    pub converged: bool,
    pub evaluations: usize,
}

pub struct Calibrator {
    targets: Vec<CalibrationTarget>,
    options: LeastSquaresOptions,
    state: CalibrationState,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let n = config.targets.len();
        if n == 0 {
            return Err(CalibrationError::NoTargets);
        }

        let mut options = LeastSquaresOptions {
            max_iterations: config.max_iterations,
            ..LeastSquaresOptions::default()
        };
        let bounds = match &config.bounds {
            Some(pairs) => {
                if pairs.len() != n {
                    return Err(CalibrationError::BoundsMismatch {
                        targets: n,
                        bounds: pairs.len(),
                    });
                }
                Bounds::new(
                    DVector::from_iterator(n, pairs.iter().map(|p| p[0])),
                    DVector::from_iterator(n, pairs.iter().map(|p| p[1])),
                )?
            }
            None => {
                options.diff_step = UNBOUNDED_DIFF_STEP;
                Bounds::unbounded(n)
            }
        };

        Ok(Self {
            targets: config.targets.clone(),
            options,
            state: CalibrationState {
                parameters: DVector::zeros(n),
                bounds,
                last_residual: None,
            },
        })
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn targets(&self) -> &[CalibrationTarget] {
        &self.targets
    }

    /// Fit the target parameters of `model` to the observed actuator
    /// response `[h stroke, v stroke, h force, v force]`.
    ///
    /// The model is first loaded with the observed horizontal force and
    /// vertical stroke. The best parameters found are written back into the
    /// model; its last solution is left at whichever candidate was evaluated
    /// last.
    pub fn calibrate<M: StructuralModel + ?Sized>(
        &mut self,
        model: &mut M,
        observed: &[f64; RESPONSE_LEN],
    ) -> Result<CalibrationOutcome, CalibrationError> {
        model.set_load_between_nodes(observed[2], HORIZONTAL_ACTUATOR)?;
        model.set_displacement_between_nodes(observed[1], VERTICAL_ACTUATOR)?;

        let x0 = self
            .targets
            .iter()
            .map(|t| model.element_parameter(t.element, &t.parameter))
            .collect::<Result<Vec<_>, _>>()?;
        let x0 = DVector::from_vec(x0);
        let observed = DVector::from_row_slice(observed);

        let targets = &self.targets;
        let report = levenberg_marquardt(
            |candidate| match predict(&mut *model, targets, candidate) {
                Ok(predicted) => &observed - predicted,
                Err(e) => {
                    debug!("calibration candidate rejected: {}", e);
                    penalty_residual()
                }
            },
            &x0,
            &self.state.bounds,
            &self.options,
        )?;

        for (target, &value) in self.targets.iter().zip(report.x.iter()) {
            model.set_element_parameter(target.element, &target.parameter, value)?;
        }

        info!(
            "calibration {:?} after {} evaluations: cost {:.4e} -> {:.4e}, parameters {:?}",
            report.termination,
            report.evaluations,
            report.initial_cost,
            report.cost,
            report.x.as_slice()
        );

        self.state.parameters = report.x.clone();
        self.state.last_residual = Some(report.residuals.clone());

        Ok(CalibrationOutcome {
            cost: report.cost,
            initial_cost: report.initial_cost,
            parameters: report.x.iter().copied().collect(),
            converged: report.termination.converged(),
            evaluations: report.evaluations,
        })
    }
}

/// Failure of one candidate evaluation, turned into a penalty by the caller.
#[derive(Error, Debug)]
enum CandidateError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Solve(#[from] SolverFailure),
}

fn predict<M: StructuralModel + ?Sized>(
    model: &mut M,
    targets: &[CalibrationTarget],
    candidate: &DVector<f64>,
) -> Result<DVector<f64>, CandidateError> {
    for (target, &value) in targets.iter().zip(candidate.iter()) {
        model.set_element_parameter(target.element, &target.parameter, value)?;
    }
    model.solve()?;
    let response = bench::response_vector(&*model)?;
    Ok(DVector::from_row_slice(&response))
}

/// Residual whose squared norm is [`PENALTY_COST`].
fn penalty_residual() -> DVector<f64> {
    DVector::from_element(RESPONSE_LEN, (PENALTY_COST / RESPONSE_LEN as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use simulator::structure::{bench_frame, PlanarFrame};

    fn loaded_response(modulus: f64, force: f64, stroke: f64) -> [f64; 4] {
        let mut frame = bench_frame(modulus).unwrap();
        frame
            .set_load_between_nodes(force, HORIZONTAL_ACTUATOR)
            .unwrap();
        frame
            .set_displacement_between_nodes(stroke, VERTICAL_ACTUATOR)
            .unwrap();
        frame.solve().unwrap();
        bench::response_vector(&frame).unwrap()
    }

    fn specimen_modulus(frame: &PlanarFrame) -> f64 {
        frame.element_parameter(SPECIMEN_ELEMENT, "E").unwrap()
    }

    #[test]
    fn test_observation_matching_prediction_costs_nothing() {
        let observed = loaded_response(100e3, 80.0, 15.0);
        let mut model = bench_frame(100e3).unwrap();
        let mut calibrator = Calibrator::new(&CalibrationConfig::default()).unwrap();

        let outcome = calibrator.calibrate(&mut model, &observed).unwrap();
        assert!(outcome.cost < 1e-12, "cost {}", outcome.cost);
        assert_relative_eq!(outcome.parameters[0], 100e3, max_relative = 1e-6);
        assert_relative_eq!(specimen_modulus(&model), 100e3, max_relative = 1e-6);
    }

    #[test]
    fn test_recovers_specimen_modulus() {
        let observed = loaded_response(70e3, 100.0, 20.0);
        let mut model = bench_frame(100e3).unwrap();
        let mut calibrator = Calibrator::new(&CalibrationConfig::default()).unwrap();

        let outcome = calibrator.calibrate(&mut model, &observed).unwrap();
        assert!(outcome.cost <= outcome.initial_cost);
        assert!(outcome.cost < 1e-6 * outcome.initial_cost);
        assert_relative_eq!(specimen_modulus(&model), 70e3, max_relative = 1e-3);
        assert_eq!(
            calibrator.state().parameters.as_slice(),
            outcome.parameters.as_slice()
        );
        assert!(calibrator.state().last_residual.is_some());
    }

    #[test]
    fn test_bounded_fit_improves_and_respects_bounds() {
        let observed = loaded_response(70e3, 100.0, 20.0);
        let mut model = bench_frame(100e3).unwrap();
        let config = CalibrationConfig {
            bounds: Some(vec![[80e3, 150e3]]),
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(&config).unwrap();

        let outcome = calibrator.calibrate(&mut model, &observed).unwrap();
        assert!(outcome.cost < outcome.initial_cost);
        let modulus = specimen_modulus(&model);
        assert!((80e3..=150e3).contains(&modulus));
        assert_relative_eq!(modulus, 80e3, max_relative = 1e-3);
    }

    #[test]
    fn test_unsolvable_candidates_are_penalised() {
        assert_relative_eq!(
            penalty_residual().norm_squared(),
            PENALTY_COST,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_config_validation() {
        let empty = CalibrationConfig {
            targets: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            Calibrator::new(&empty),
            Err(CalibrationError::NoTargets)
        ));

        let mismatched = CalibrationConfig {
            bounds: Some(vec![[1.0, 2.0], [1.0, 2.0]]),
            ..Default::default()
        };
        assert!(matches!(
            Calibrator::new(&mismatched),
            Err(CalibrationError::BoundsMismatch { .. })
        ));

        let inverted = CalibrationConfig {
            bounds: Some(vec![[2.0, 1.0]]),
            ..Default::default()
        };
        assert!(matches!(
            Calibrator::new(&inverted),
            Err(CalibrationError::LeastSquares(_))
        ));
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let config = CalibrationConfig {
            targets: vec![CalibrationTarget::new(99, "E")],
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(&config).unwrap();
        let mut model = bench_frame(100e3).unwrap();
        assert!(matches!(
            calibrator.calibrate(&mut model, &[0.0; 4]),
            Err(CalibrationError::Model(ModelError::UnknownElement(99)))
        ));
    }
}
