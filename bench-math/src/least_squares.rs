//! Bounded nonlinear least squares.
//!
//! Levenberg-Marquardt with Marquardt (diagonal) damping, a forward-difference
//! Jacobian and projection of every trial point onto a box. The cost is the
//! plain sum of squared residuals.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when setting up or running a least-squares fit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LeastSquaresError {
    #[error("Dimension mismatch: expected {expected} parameters, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid bounds for parameter {index}: lower {lower} > upper {upper}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    #[error("Residual function returned an empty vector")]
    EmptyResidual,

    #[error("Residual is not finite at the initial guess")]
    NonFiniteResidual,
}

/// Box constraints `lower <= x <= upper`, infinite entries mean unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Bounds {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self, LeastSquaresError> {
        if lower.len() != upper.len() {
            return Err(LeastSquaresError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(LeastSquaresError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// No constraint on any of the `n` parameters.
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: DVector::from_element(n, f64::NEG_INFINITY),
            upper: DVector::from_element(n, f64::INFINITY),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.iter().all(|l| l.is_infinite()) && self.upper.iter().all(|u| u.is_infinite())
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Clip `x` into the box.
    pub fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            x.iter()
                .enumerate()
                .map(|(i, &v)| v.max(self.lower[i]).min(self.upper[i])),
        )
    }
}

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeastSquaresOptions {
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is considered converged.
    pub ftol: f64,
    /// Relative step length below which the fit is considered converged.
    pub xtol: f64,
    /// Scaled projected-gradient threshold.
    pub gtol: f64,
    /// Relative forward-difference step for the Jacobian.
    pub diff_step: f64,
    pub initial_damping: f64,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            diff_step: f64::EPSILON.sqrt(),
            initial_damping: 1e-3,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ZeroResidual,
    CostTolerance,
    StepTolerance,
    GradientTolerance,
    /// Damping grew without any trial point lowering the cost.
    NoImprovement,
    MaxIterations,
}

impl Termination {
    pub fn converged(&self) -> bool {
        !matches!(self, Termination::NoImprovement | Termination::MaxIterations)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresReport {
    /// Best point found (never worse than the initial guess).
    pub x: DVector<f64>,
    pub residuals: DVector<f64>,
    pub cost: f64,
    pub initial_cost: f64,
    pub iterations: usize,
    /// Number of residual function evaluations, Jacobian columns included.
    pub evaluations: usize,
    pub termination: Termination,
}

const MAX_DAMPING: f64 = 1e12;
const MIN_DAMPING: f64 = 1e-12;

fn cost_of(r: &DVector<f64>) -> f64 {
    if r.iter().all(|v| v.is_finite()) {
        r.norm_squared()
    } else {
        f64::INFINITY
    }
}

/// Minimise `sum(residual(x)^2)` subject to `bounds`, starting from `x0`.
///
/// The initial guess is projected into the box first. Trial points whose
/// residual is not finite are rejected like any other uphill step.
///
/// # Errors
/// * `LeastSquaresError::DimensionMismatch` - If `x0` and `bounds` differ in length
/// * `LeastSquaresError::EmptyResidual` - If the residual vector is empty
/// * `LeastSquaresError::NonFiniteResidual` - If the residual at `x0` is not finite
pub fn levenberg_marquardt<F>(
    mut residual: F,
    x0: &DVector<f64>,
    bounds: &Bounds,
    options: &LeastSquaresOptions,
) -> Result<LeastSquaresReport, LeastSquaresError>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    if x0.len() != bounds.len() {
        return Err(LeastSquaresError::DimensionMismatch {
            expected: bounds.len(),
            found: x0.len(),
        });
    }
    let n = x0.len();

    let mut x = bounds.project(x0);
    let mut r = residual(&x);
    let mut evaluations = 1;
    if r.is_empty() {
        return Err(LeastSquaresError::EmptyResidual);
    }
    let mut cost = cost_of(&r);
    if !cost.is_finite() {
        return Err(LeastSquaresError::NonFiniteResidual);
    }
    let initial_cost = cost;
    let mut damping = options.initial_damping;
    let mut iterations = 0;

    let termination = loop {
        if cost <= f64::EPSILON * f64::EPSILON {
            break Termination::ZeroResidual;
        }
        if iterations >= options.max_iterations {
            break Termination::MaxIterations;
        }
        iterations += 1;

        let jac = forward_difference_jacobian(&mut residual, &x, &r, bounds, options.diff_step);
        evaluations += n;

        let gradient = jac.tr_mul(&r);
        if scaled_projected_gradient(&gradient, &x, bounds, cost) <= options.gtol {
            break Termination::GradientTolerance;
        }

        let normal = jac.tr_mul(&jac);
        let diag_max = normal.diagonal().amax();
        let floor = if diag_max > 0.0 {
            diag_max * f64::EPSILON
        } else {
            f64::MIN_POSITIVE
        };

        let mut accepted = None;
        while damping <= MAX_DAMPING {
            let mut lhs = normal.clone();
            for j in 0..n {
                lhs[(j, j)] += damping * normal[(j, j)].max(floor);
            }
            let Some(step) = solve_normal(lhs, -&gradient) else {
                damping *= 10.0;
                continue;
            };

            let x_trial = bounds.project(&(&x + &step));
            let step = &x_trial - &x;
            let r_trial = residual(&x_trial);
            evaluations += 1;
            let cost_trial = cost_of(&r_trial);

            if cost_trial < cost {
                let predicted = -(2.0 * step.dot(&gradient) + (&jac * &step).norm_squared());
                let actual = cost - cost_trial;
                let ratio = if predicted > 0.0 { actual / predicted } else { 0.0 };
                if ratio > 0.75 {
                    damping = (damping / 3.0).max(MIN_DAMPING);
                } else if ratio < 0.25 {
                    damping *= 2.0;
                }
                accepted = Some((x_trial, r_trial, cost_trial, step, ratio));
                break;
            }
            damping *= 10.0;
        }

        let Some((x_new, r_new, cost_new, step, ratio)) = accepted else {
            break Termination::NoImprovement;
        };

        let reduction = cost - cost_new;
        let small_step = step.norm() <= options.xtol * (options.xtol + x.norm());
        x = x_new;
        r = r_new;
        cost = cost_new;

        if reduction <= options.ftol * (cost + reduction) && ratio > 0.25 {
            break Termination::CostTolerance;
        }
        if small_step {
            break Termination::StepTolerance;
        }
    };

    debug!(
        "least squares finished: {:?} after {} iterations, cost {:.3e} -> {:.3e}",
        termination, iterations, initial_cost, cost
    );

    Ok(LeastSquaresReport {
        x,
        residuals: r,
        cost,
        initial_cost,
        iterations,
        evaluations,
        termination,
    })
}

fn solve_normal(lhs: DMatrix<f64>, rhs: DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = lhs.clone().cholesky() {
        return Some(chol.solve(&rhs));
    }
    lhs.lu().solve(&rhs)
}

/// Forward-difference Jacobian, stepping inward when the forward point would
/// leave the box.
fn forward_difference_jacobian<F>(
    residual: &mut F,
    x: &DVector<f64>,
    r: &DVector<f64>,
    bounds: &Bounds,
    rel_step: f64,
) -> DMatrix<f64>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    let m = r.len();
    let mut jac = DMatrix::<f64>::zeros(m, x.len());
    for j in 0..x.len() {
        let sign = if x[j] >= 0.0 { 1.0 } else { -1.0 };
        let mut h = rel_step * sign * x[j].abs().max(1.0);
        if x[j] + h > bounds.upper()[j] || x[j] + h < bounds.lower()[j] {
            h = -h;
        }
        let mut x_step = x.clone();
        x_step[j] += h;
        // Actual representable step
        let h = x_step[j] - x[j];
        let r_step = residual(&x_step);
        if r_step.len() != m || h == 0.0 {
            continue;
        }
        for i in 0..m {
            let d = (r_step[i] - r[i]) / h;
            jac[(i, j)] = if d.is_finite() { d } else { 0.0 };
        }
    }
    jac
}

/// Infinity norm of the gradient after zeroing components that push against
/// an active bound, scaled to be dimensionless.
fn scaled_projected_gradient(
    gradient: &DVector<f64>,
    x: &DVector<f64>,
    bounds: &Bounds,
    cost: f64,
) -> f64 {
    gradient
        .iter()
        .enumerate()
        .map(|(j, &g)| {
            let blocked = (x[j] <= bounds.lower()[j] && g > 0.0)
                || (x[j] >= bounds.upper()[j] && g < 0.0);
            if blocked {
                0.0
            } else {
                g.abs() * x[j].abs().max(1.0) / cost.max(f64::MIN_POSITIVE)
            }
        })
        .fold(0.0, f64::max)
}
