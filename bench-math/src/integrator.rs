//! Adaptive Runge-Kutta integration.
//!
//! Dormand-Prince 5(4) with an embedded error estimate and a standard
//! step-size controller. Only the endpoint of the interval is returned, which
//! is all the actuator planner needs per control tick.

use nalgebra::SVector;
use thiserror::Error;

/// Errors that can occur while integrating an ODE
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Invalid interval [{t0}, {t1}]")]
    InvalidInterval { t0: f64, t1: f64 },

    #[error("Step size underflow at t={t} (h={step})")]
    StepSizeUnderflow { t: f64, step: f64 },

    #[error("Exceeded {max_steps} steps before reaching t={t_end}")]
    TooManySteps { max_steps: usize, t_end: f64 },

    #[error("Non-finite state encountered at t={t}")]
    NonFinite { t: f64 },
}

/// Tolerances and limits for [`integrate`].
///
/// Defaults match the usual `rtol = 1e-3`, `atol = 1e-6` of general purpose
/// solvers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Maximum number of attempted steps (accepted and rejected).
    pub max_steps: usize,
    /// Smallest step, relative to the interval length, before giving up.
    pub min_step_fraction: f64,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-6,
            max_steps: 10_000,
            min_step_fraction: 1e-12,
        }
    }
}

// Dormand-Prince tableau
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

/// Integrate `dy/dt = f(t, y)` from `t_span.0` to `t_span.1` and return `y(t_span.1)`.
///
/// A zero-length interval returns `y0` without evaluating `f`.
///
/// # Errors
/// * `IntegrationError::InvalidInterval` - If the interval is reversed or not finite
/// * `IntegrationError::NonFinite` - If the state or derivative becomes NaN/inf
/// * `IntegrationError::StepSizeUnderflow` - If the controller cannot meet the tolerances
/// * `IntegrationError::TooManySteps` - If `max_steps` attempts do not reach the end
pub fn integrate<const N: usize, F>(
    f: F,
    y0: SVector<f64, N>,
    t_span: (f64, f64),
    options: &IntegratorOptions,
) -> Result<SVector<f64, N>, IntegrationError>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let (t0, t1) = t_span;
    if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
        return Err(IntegrationError::InvalidInterval { t0, t1 });
    }
    if !all_finite(&y0) {
        return Err(IntegrationError::NonFinite { t: t0 });
    }

    let span = t1 - t0;
    if span == 0.0 {
        return Ok(y0);
    }
    let min_step = span * options.min_step_fraction;

    let mut t = t0;
    let mut y = y0;
    let mut k1 = f(t, &y);
    if !all_finite(&k1) {
        return Err(IntegrationError::NonFinite { t });
    }
    let mut h = initial_step(&y, &k1, span, options);

    for _ in 0..options.max_steps {
        let remaining = t1 - t;
        if remaining <= 0.0 {
            return Ok(y);
        }
        let last = h >= remaining;
        if last {
            h = remaining;
        }
        if h < min_step {
            return Err(IntegrationError::StepSizeUnderflow { t, step: h });
        }

        let k2 = f(t + C2 * h, &(y + k1 * (A21 * h)));
        let k3 = f(t + C3 * h, &(y + (k1 * A31 + k2 * A32) * h));
        let k4 = f(t + C4 * h, &(y + (k1 * A41 + k2 * A42 + k3 * A43) * h));
        let k5 = f(
            t + C5 * h,
            &(y + (k1 * A51 + k2 * A52 + k3 * A53 + k4 * A54) * h),
        );
        let k6 = f(
            t + h,
            &(y + (k1 * A61 + k2 * A62 + k3 * A63 + k4 * A64 + k5 * A65) * h),
        );
        let y_new = y + (k1 * B1 + k3 * B3 + k4 * B4 + k5 * B5 + k6 * B6) * h;
        if !all_finite(&y_new) {
            return Err(IntegrationError::NonFinite { t: t + h });
        }
        let k7 = f(t + h, &y_new);
        if !all_finite(&k7) {
            return Err(IntegrationError::NonFinite { t: t + h });
        }

        let err = (k1 * E1 + k3 * E3 + k4 * E4 + k5 * E5 + k6 * E6 + k7 * E7) * h;
        let err_norm = scaled_rms(&err, &y, &y_new, options);

        if err_norm <= 1.0 {
            t = if last { t1 } else { t + h };
            y = y_new;
            // First-same-as-last: k7 is the derivative at the new point
            k1 = k7;
            let factor = if err_norm == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err_norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            h *= factor;
            if last {
                return Ok(y);
            }
        } else {
            h *= (SAFETY * err_norm.powf(-0.2)).max(MIN_FACTOR);
        }
    }

    Err(IntegrationError::TooManySteps {
        max_steps: options.max_steps,
        t_end: t1,
    })
}

fn all_finite<const N: usize>(v: &SVector<f64, N>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn scaled_rms<const N: usize>(
    err: &SVector<f64, N>,
    y: &SVector<f64, N>,
    y_new: &SVector<f64, N>,
    options: &IntegratorOptions,
) -> f64 {
    if N == 0 {
        return 0.0;
    }
    let sum: f64 = (0..N)
        .map(|i| {
            let scale = options.atol + options.rtol * y[i].abs().max(y_new[i].abs());
            (err[i] / scale).powi(2)
        })
        .sum();
    (sum / N as f64).sqrt()
}

/// Rough first step from the size of the state and its derivative.
fn initial_step<const N: usize>(
    y: &SVector<f64, N>,
    dy: &SVector<f64, N>,
    span: f64,
    options: &IntegratorOptions,
) -> f64 {
    let mut y_norm = 0.0;
    let mut dy_norm = 0.0;
    for i in 0..N {
        let scale = options.atol + options.rtol * y[i].abs();
        y_norm += (y[i] / scale).powi(2);
        dy_norm += (dy[i] / scale).powi(2);
    }
    if N > 0 {
        y_norm = (y_norm / N as f64).sqrt();
        dy_norm = (dy_norm / N as f64).sqrt();
    }

    let h = if y_norm < 1e-5 || dy_norm < 1e-5 {
        1e-6_f64.max(span * 1e-3)
    } else {
        0.01 * y_norm / dy_norm
    };
    h.min(span)
}
