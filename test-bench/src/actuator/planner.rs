//! Saturated sinusoidal tracking for a single actuator axis.
//!
//! The planner state is `[position, velocity]` of the controlled quantity
//! (force for the horizontal actuator, stroke for the vertical one). Each step
//! integrates a tracking law that pulls the state onto the reference
//! `A sin(omega t)`, with velocity and acceleration saturated at limits derived
//! from the reference itself.

use std::f64::consts::PI;

use bench_math::{integrate, IntegrationError, IntegratorOptions};
use nalgebra::Vector2;
use proto_control::{Axis, AxisState};
use thiserror::Error;
use tracing::debug;

/// Headroom of the velocity and acceleration limits over the reference peaks.
pub const DEFAULT_LIMIT_MARGIN: f64 = 1.1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Invalid amplitude {0} (must be finite and non-negative)")]
    InvalidAmplitude(f64),

    #[error("Invalid period {0} min (must be positive)")]
    InvalidPeriod(f64),

    #[error("Invalid frequency {0} rpm (must be positive)")]
    InvalidFrequency(f64),

    #[error("Invalid limit margin {0} (must be positive)")]
    InvalidMargin(f64),

    #[error("Invalid execution interval {0} s")]
    InvalidInterval(f64),

    #[error("Integration failed: {0}")]
    Integration(#[from] IntegrationError),
}

/// Reference and saturation limits of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub amplitude: f64,
    /// Reference angular frequency [rad/s].
    pub angular_frequency: f64,
    pub v_max: f64,
    pub a_max: f64,
}

impl AxisLimits {
    pub fn new(amplitude: f64, angular_frequency: f64, margin: f64) -> Self {
        let v_max = amplitude * angular_frequency * margin;
        Self {
            amplitude,
            angular_frequency,
            v_max,
            a_max: v_max * angular_frequency * margin,
        }
    }

    /// Peak velocity of the reference, `A * omega`.
    pub fn peak_velocity(&self) -> f64 {
        self.amplitude * self.angular_frequency
    }

    /// Time on the reference cycle matching `position`.
    ///
    /// The falling half of the cycle is chosen when `velocity` is negative.
    /// Positions outside the amplitude map to the start of the cycle.
    fn reference_time(&self, position: f64, velocity: f64) -> f64 {
        let ratio = position / self.amplitude;
        let mut ts = if ratio.abs() <= 1.0 {
            ratio.asin() / self.angular_frequency
        } else {
            0.0
        };
        if velocity < 0.0 {
            ts = PI / self.angular_frequency - ts;
        }
        ts
    }

    /// Reference velocity at the point of the cycle matching the state.
    pub fn reference_velocity(&self, position: f64, velocity: f64) -> f64 {
        let ts = self.reference_time(position, velocity);
        self.peak_velocity() * (self.angular_frequency * ts).cos()
    }

    /// Acceleration bounds: correction back toward the centre gets twice the
    /// authority of a push outward.
    fn acceleration_bounds(&self, position: f64) -> (f64, f64) {
        if position > 0.0 {
            (-2.0 * self.a_max, self.a_max)
        } else {
            (-self.a_max, 2.0 * self.a_max)
        }
    }
}

/// Time derivative of `[position, velocity]` under the tracking law.
pub fn derivative(state: &Vector2<f64>, limits: &AxisLimits) -> Vector2<f64> {
    let (s, v) = (state[0], state[1]);
    let omega = limits.angular_frequency;
    let amplitude = limits.amplitude;

    let ts = limits.reference_time(s, v);
    let v0 = limits.peak_velocity();
    let v_target = v0 * (omega * ts).cos();
    let mut a_target = -v0 * omega * (omega * ts).sin();

    let scale = if v != 0.0 { v_target / v } else { 1.0 };
    if a_target == 0.0 && v_target != v {
        a_target = v_target;
    }
    a_target = a_target * scale + (v_target - v);

    // Past the amplitude the reference no longer applies; pull straight back.
    if s.abs() >= amplitude {
        a_target = if s > 0.0 {
            -(s.abs() - amplitude)
        } else {
            s.abs() - amplitude
        };
    }

    let (a_low, a_high) = limits.acceleration_bounds(s);
    Vector2::new(
        clip(v, -limits.v_max, limits.v_max),
        clip(a_target, a_low, a_high),
    )
}

/// NaN-tolerant clamp; a NaN input passes through for the integrator to reject.
fn clip(value: f64, low: f64, high: f64) -> f64 {
    value.max(low).min(high)
}

/// Integrate the tracking law from `state` over `duration` seconds.
///
/// The endpoint velocity is saturated to `±v_max`.
pub fn advance(
    state: AxisState,
    limits: &AxisLimits,
    duration: f64,
) -> Result<AxisState, IntegrationError> {
    let y0 = Vector2::new(state.position, state.velocity);
    let end = integrate(
        |_t, y| derivative(y, limits),
        y0,
        (0.0, duration),
        &IntegratorOptions::default(),
    )?;
    Ok(AxisState::new(
        end[0],
        clip(end[1], -limits.v_max, limits.v_max),
    ))
}

/// Trajectory generator for one actuator axis.
#[derive(Debug, Clone)]
pub struct MotionPlanner {
    axis: Axis,
    state: AxisState,
    limits: AxisLimits,
    margin: f64,
    /// Execution interval [s].
    dt: f64,
    last_commanded: f64,
}

impl MotionPlanner {
    /// Planner at rest, tracking `amplitude * sin(omega t)` with a period
    /// given in minutes.
    pub fn new(
        axis: Axis,
        amplitude: f64,
        period_minutes: f64,
        margin: f64,
        dt: f64,
    ) -> Result<Self, PlannerError> {
        validate_amplitude(amplitude)?;
        if !(margin > 0.0 && margin.is_finite()) {
            return Err(PlannerError::InvalidMargin(margin));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(PlannerError::InvalidInterval(dt));
        }
        let omega = period_to_angular_frequency(period_minutes)?;
        Ok(Self {
            axis,
            state: AxisState::default(),
            limits: AxisLimits::new(amplitude, omega, margin),
            margin,
            dt,
            last_commanded: 0.0,
        })
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn state(&self) -> AxisState {
        self.state
    }

    pub fn limits(&self) -> &AxisLimits {
        &self.limits
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Position produced by the last committed step.
    pub fn last_commanded(&self) -> f64 {
        self.last_commanded
    }

    pub fn set_amplitude(&mut self, amplitude: f64) -> Result<(), PlannerError> {
        validate_amplitude(amplitude)?;
        self.limits = AxisLimits::new(amplitude, self.limits.angular_frequency, self.margin);
        debug!("{} planner amplitude set to {}", self.axis, amplitude);
        Ok(())
    }

    /// Set the reference frequency in revolutions per minute.
    pub fn set_frequency(&mut self, rpm: f64) -> Result<(), PlannerError> {
        if !(rpm > 0.0 && rpm.is_finite()) {
            return Err(PlannerError::InvalidFrequency(rpm));
        }
        self.limits = AxisLimits::new(self.limits.amplitude, rpm / 60.0, self.margin);
        Ok(())
    }

    /// Set the reference period in minutes.
    pub fn set_period(&mut self, minutes: f64) -> Result<(), PlannerError> {
        let omega = period_to_angular_frequency(minutes)?;
        self.limits = AxisLimits::new(self.limits.amplitude, omega, self.margin);
        debug!("{} planner period set to {} min", self.axis, minutes);
        Ok(())
    }

    /// State one execution interval ahead, without committing it.
    pub fn predict(&self) -> Result<AxisState, PlannerError> {
        Ok(advance(self.state, &self.limits, self.dt)?)
    }

    pub fn commit(&mut self, state: AxisState) {
        self.state = state;
        self.last_commanded = state.position;
    }

    /// Advance one execution interval and commit the result.
    pub fn step(&mut self) -> Result<AxisState, PlannerError> {
        let next = self.predict()?;
        self.commit(next);
        Ok(next)
    }

    /// Propagate an arbitrary state through the tracking law for `duration`
    /// seconds under this planner's limits.
    pub fn propagate(&self, state: AxisState, duration: f64) -> Result<AxisState, IntegrationError> {
        advance(state, &self.limits, duration)
    }

    /// Snap onto an observed position, taking the reference velocity for that
    /// point of the cycle. The current velocity sign selects the half cycle.
    pub fn resync(&mut self, observed: f64) {
        let velocity = self.limits.reference_velocity(observed, self.state.velocity);
        debug!(
            "{} planner resync: {:.3} -> {:.3}",
            self.axis, self.state.position, observed
        );
        self.state = AxisState::new(observed, velocity);
    }

    /// Return to rest at the centre of the cycle.
    pub fn reset(&mut self) {
        self.state = AxisState::default();
        self.last_commanded = 0.0;
    }
}

fn validate_amplitude(amplitude: f64) -> Result<(), PlannerError> {
    if amplitude.is_finite() && amplitude >= 0.0 {
        Ok(())
    } else {
        Err(PlannerError::InvalidAmplitude(amplitude))
    }
}

/// Angular frequency [rad/s] of a cycle lasting `minutes`.
pub fn period_to_angular_frequency(minutes: f64) -> Result<f64, PlannerError> {
    if !(minutes > 0.0 && minutes.is_finite()) {
        return Err(PlannerError::InvalidPeriod(minutes));
    }
    Ok((2.0 * PI / 60.0) / minutes)
}
