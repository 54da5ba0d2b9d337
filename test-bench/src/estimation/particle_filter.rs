//! Bootstrap particle filter over one actuator axis.
//!
//! The process model is the axis's own [`MotionPlanner`] tracking law, so the
//! cloud spreads along the commanded trajectory between observations.

use bench_math::{stats, IntegrationError};
use ndarray::Array1;
use proto_control::AxisState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::actuator::MotionPlanner;

/// Added to every likelihood so a cloud far from the observation still has
/// a usable weight distribution.
const LIKELIHOOD_FLOOR: f64 = 1e-12;

/// Smallest observation spread used when the axis amplitude is zero.
const MIN_OBSERVATION_SIGMA: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("Particle propagation failed: {0}")]
    Propagation(#[from] IntegrationError),

    #[error("Invalid noise level {0}")]
    InvalidNoise(f64),
}

/// Particle filter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub particles: usize,
    /// Process noise on position, as a fraction of the axis amplitude.
    pub position_noise_fraction: f64,
    /// Process noise on velocity, as a fraction of the axis velocity limit.
    pub velocity_noise_fraction: f64,
    /// Observation spread, as a fraction of the axis amplitude.
    pub observation_noise_fraction: f64,
    /// Longest gap, in ticks, the cloud is carried across. Beyond it the cloud
    /// is stale and is re-seeded from the planner.
    pub max_gap_steps: u64,
    pub seed: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            particles: 100,
            position_noise_fraction: 0.02,
            velocity_noise_fraction: 0.05,
            observation_noise_fraction: 0.05,
            max_gap_steps: 100,
            seed: 7,
        }
    }
}

/// Filtered axis state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean_position: f64,
    pub mean_velocity: f64,
    pub position_std: f64,
}

impl Estimate {
    pub fn state(&self) -> AxisState {
        AxisState::new(self.mean_position, self.mean_velocity)
    }
}

/// Weighted particle set. Weights sum to one after every update.
#[derive(Debug, Clone, Default)]
pub struct ParticleCloud {
    positions: Array1<f64>,
    velocities: Array1<f64>,
    weights: Array1<f64>,
}

impl ParticleCloud {
    /// `count` identical particles at `state` with uniform weights.
    pub fn seeded(state: AxisState, count: usize) -> Self {
        let uniform = if count > 0 { 1.0 / count as f64 } else { 0.0 };
        Self {
            positions: Array1::from_elem(count, state.position),
            velocities: Array1::from_elem(count, state.velocity),
            weights: Array1::from_elem(count, uniform),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &Array1<f64> {
        &self.positions
    }

    pub fn velocities(&self) -> &Array1<f64> {
        &self.velocities
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Jitter every particle, then push it through the planner's tracking law
    /// one planner interval at a time for `steps` intervals.
    fn predict<R: Rng + ?Sized>(
        &mut self,
        planner: &MotionPlanner,
        steps: u64,
        position_noise: &Normal<f64>,
        velocity_noise: &Normal<f64>,
        rng: &mut R,
    ) -> Result<(), IntegrationError> {
        for i in 0..self.len() {
            let mut moved = AxisState::new(
                self.positions[i] + position_noise.sample(rng),
                self.velocities[i] + velocity_noise.sample(rng),
            );
            for _ in 0..steps {
                moved = planner.propagate(moved, planner.dt())?;
            }
            self.positions[i] = moved.position;
            self.velocities[i] = moved.velocity;
        }
        Ok(())
    }

    /// Gaussian likelihood weighting against an observed position.
    fn update(&mut self, observation: f64, sigma: f64) {
        for (w, x) in self.weights.iter_mut().zip(self.positions.iter()) {
            let z = (observation - x) / sigma;
            *w = (-0.5 * z * z).exp() + LIKELIHOOD_FLOOR;
        }
        if let Some(weights) = self.weights.as_slice_mut() {
            stats::normalize(weights);
        }
    }

    /// Multinomial resampling; weights return to uniform.
    fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.len();
        if n == 0 {
            return;
        }
        let cdf = stats::cumulative_sum(self.weights.as_slice().unwrap_or_default());
        let total = cdf.last().copied().unwrap_or(1.0);

        let mut positions = Array1::zeros(n);
        let mut velocities = Array1::zeros(n);
        for i in 0..n {
            let u = rng.random::<f64>() * total;
            let j = cdf.partition_point(|&c| c <= u).min(n - 1);
            positions[i] = self.positions[j];
            velocities[i] = self.velocities[j];
        }
        self.positions = positions;
        self.velocities = velocities;
        self.weights.fill(1.0 / n as f64);
    }

    /// Mean state and position spread of the cloud.
    pub fn summary(&self) -> Estimate {
        let positions = self.positions.as_slice().unwrap_or_default();
        let velocities = self.velocities.as_slice().unwrap_or_default();
        Estimate {
            mean_position: stats::mean(positions).unwrap_or(0.0),
            mean_velocity: stats::mean(velocities).unwrap_or(0.0),
            position_std: stats::std_dev(positions).unwrap_or(0.0),
        }
    }
}

/// One predict / update / resample cycle against `observation`.
///
/// An empty cloud is first seeded at the planner's current state. The cloud is
/// propagated over `elapsed_steps` planner intervals; with zero elapsed steps
/// only the process noise is applied.
pub fn estimate<R: Rng + ?Sized>(
    cloud: &mut ParticleCloud,
    planner: &MotionPlanner,
    observation: f64,
    elapsed_steps: u64,
    config: &EstimatorConfig,
    rng: &mut R,
) -> Result<Estimate, EstimatorError> {
    if cloud.is_empty() {
        *cloud = ParticleCloud::seeded(planner.state(), config.particles);
    }

    let limits = planner.limits();
    let position_noise = noise(config.position_noise_fraction * limits.amplitude)?;
    let velocity_noise = noise(config.velocity_noise_fraction * limits.v_max)?;
    cloud.predict(planner, elapsed_steps, &position_noise, &velocity_noise, rng)?;

    let sigma = (config.observation_noise_fraction * limits.amplitude).max(MIN_OBSERVATION_SIGMA);
    cloud.update(observation, sigma);
    cloud.resample(rng);

    let estimate = cloud.summary();
    trace!(
        "{} estimate: {:.3} ± {:.3} (observed {:.3})",
        planner.axis(),
        estimate.mean_position,
        estimate.position_std,
        observation
    );
    Ok(estimate)
}

fn noise(sigma: f64) -> Result<Normal<f64>, EstimatorError> {
    Normal::new(0.0, sigma).map_err(|_| EstimatorError::InvalidNoise(sigma))
}

/// Particle filter bound to one axis across ticks.
#[derive(Debug, Clone)]
pub struct AxisEstimator {
    cloud: ParticleCloud,
    config: EstimatorConfig,
    rng: StdRng,
    last_tick: Option<u64>,
}

impl AxisEstimator {
    pub fn new(config: EstimatorConfig, seed: u64) -> Self {
        Self {
            cloud: ParticleCloud::default(),
            config,
            rng: StdRng::seed_from_u64(seed),
            last_tick: None,
        }
    }

    pub fn cloud(&self) -> &ParticleCloud {
        &self.cloud
    }

    /// Tick of the last successful estimate.
    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Estimate the axis state at `tick`, propagating the cloud over the ticks
    /// since the previous call.
    ///
    /// A cloud older than `max_gap_steps` ticks is re-seeded from the planner
    /// instead. A failed estimate drops the cloud, so the next call starts
    /// afresh.
    pub fn estimate(
        &mut self,
        planner: &MotionPlanner,
        observation: f64,
        tick: u64,
    ) -> Result<Estimate, EstimatorError> {
        let mut elapsed = self
            .last_tick
            .map(|last| tick.saturating_sub(last))
            .unwrap_or(0);
        if elapsed > self.config.max_gap_steps {
            debug!(
                "{} cloud is {} ticks old, re-seeding from the planner",
                planner.axis(),
                elapsed
            );
            self.cloud = ParticleCloud::default();
            elapsed = 0;
        }

        match estimate(
            &mut self.cloud,
            planner,
            observation,
            elapsed,
            &self.config,
            &mut self.rng,
        ) {
            Ok(result) => {
                self.last_tick = Some(tick);
                Ok(result)
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Drop the cloud; the next estimate re-seeds it from the planner.
    pub fn reset(&mut self) {
        self.cloud = ParticleCloud::default();
        self.last_tick = None;
    }
}
