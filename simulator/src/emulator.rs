//! Stand-in for the physical bench.
//!
//! Drives a "true" bench frame along sinusoidal actuator references and
//! reports noisy actuator readings, the way the real bench's controller and
//! load cells would.

use std::f64::consts::PI;

use proto_control::{BenchCommand, PhysicalObservation, Timestamp};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::structure::bench::{self, HORIZONTAL_ACTUATOR, SPECIMEN_ELEMENT, VERTICAL_ACTUATOR};
use crate::structure::{ModelError, PlanarFrame, SolverFailure, StructuralModel};

#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Solve failed: {0}")]
    Solve(#[from] SolverFailure),

    #[error("Invalid noise level {0}")]
    InvalidNoise(f64),
}

/// Emulator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Modulus of the physical specimen [N/mm^2].
    pub specimen_modulus: f64,
    /// Standard deviation of the stroke readings [mm].
    pub displacement_noise: f64,
    /// Standard deviation of the load cell readings [N].
    pub force_noise: f64,
    pub horizontal_force_amplitude: f64,
    pub vertical_displacement_amplitude: f64,
    /// Excitation periods [min].
    pub horizontal_period: f64,
    pub vertical_period: f64,
    pub seed: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            specimen_modulus: bench::ALUMINIUM_MODULUS,
            displacement_noise: 0.05,
            force_noise: 0.5,
            horizontal_force_amplitude: 100.0,
            vertical_displacement_amplitude: 20.0,
            horizontal_period: 2.0,
            vertical_period: 2.0,
            seed: 42,
        }
    }
}

/// `amplitude * sin(omega * t)` with the period given in minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineReference {
    pub amplitude: f64,
    pub period_minutes: f64,
}

impl SineReference {
    pub fn angular_frequency(&self) -> f64 {
        (2.0 * PI / 60.0) / self.period_minutes
    }

    pub fn value(&self, t: f64) -> f64 {
        self.amplitude * (self.angular_frequency() * t).sin()
    }
}

pub struct PhysicalTwinEmulator {
    frame: PlanarFrame,
    horizontal: SineReference,
    vertical: SineReference,
    excitation_on: bool,
    /// Time since excitation was switched on [s].
    excitation_time: f64,
    /// Time since the emulator started [s].
    clock: f64,
    execution_interval: f64,
    displacement_noise: Normal<f64>,
    force_noise: Normal<f64>,
    rng: StdRng,
}

impl PhysicalTwinEmulator {
    pub fn new(config: &EmulatorConfig, execution_interval: f64) -> Result<Self, EmulatorError> {
        let noise =
            |sigma: f64| Normal::new(0.0, sigma).map_err(|_| EmulatorError::InvalidNoise(sigma));
        Ok(Self {
            frame: bench::bench_frame(config.specimen_modulus)?,
            horizontal: SineReference {
                amplitude: config.horizontal_force_amplitude,
                period_minutes: config.horizontal_period,
            },
            vertical: SineReference {
                amplitude: config.vertical_displacement_amplitude,
                period_minutes: config.vertical_period,
            },
            excitation_on: false,
            excitation_time: 0.0,
            clock: 0.0,
            execution_interval,
            displacement_noise: noise(config.displacement_noise)?,
            force_noise: noise(config.force_noise)?,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub fn excitation_on(&self) -> bool {
        self.excitation_on
    }

    pub fn specimen_modulus(&self) -> Result<f64, ModelError> {
        self.frame.element_parameter(SPECIMEN_ELEMENT, "E")
    }

    /// Change the physical specimen, e.g. to emulate damage.
    pub fn set_specimen_modulus(&mut self, modulus: f64) -> Result<(), ModelError> {
        self.frame.set_element_parameter(SPECIMEN_ELEMENT, "E", modulus)
    }

    pub fn apply_command(&mut self, command: &BenchCommand) {
        if let Some(on) = command.excitation_on {
            if on && !self.excitation_on {
                self.excitation_time = 0.0;
            }
            if on != self.excitation_on {
                info!("emulator excitation {}", if on { "on" } else { "off" });
            }
            self.excitation_on = on;
        }
        if let Some(amplitude) = command.horizontal_force_amplitude {
            self.horizontal.amplitude = amplitude;
        }
        if let Some(amplitude) = command.vertical_displacement_amplitude {
            self.vertical.amplitude = amplitude;
        }
        if let Some(period) = command.horizontal_period {
            self.horizontal.period_minutes = period;
        }
        if let Some(period) = command.vertical_period {
            self.vertical.period_minutes = period;
        }
    }

    /// Advance one execution interval and read the actuators.
    ///
    /// With excitation off the bench is at rest and all readings are zero.
    pub fn step(
        &mut self,
        command: Option<&BenchCommand>,
    ) -> Result<PhysicalObservation, EmulatorError> {
        if let Some(command) = command {
            self.apply_command(command);
        }
        self.clock += self.execution_interval;
        let timestamp = Timestamp::from_secs_f64(self.clock);

        if !self.excitation_on {
            return Ok(PhysicalObservation {
                timestamp,
                ..Default::default()
            });
        }

        self.excitation_time += self.execution_interval;
        let force = self.horizontal.value(self.excitation_time);
        let stroke = self.vertical.value(self.excitation_time);
        self.frame.set_load_between_nodes(force, HORIZONTAL_ACTUATOR)?;
        self.frame.set_displacement_between_nodes(stroke, VERTICAL_ACTUATOR)?;
        self.frame.solve()?;

        let [h_disp, v_disp, h_force, v_force] = bench::response_vector(&self.frame)?;
        let observation = PhysicalObservation {
            horizontal_displacement: h_disp + self.displacement_noise.sample(&mut self.rng),
            vertical_displacement: v_disp + self.displacement_noise.sample(&mut self.rng),
            horizontal_force: h_force + self.force_noise.sample(&mut self.rng),
            vertical_force: v_force + self.force_noise.sample(&mut self.rng),
            timestamp,
        };
        debug!(
            "emulator t={:.1}s force={:.2} stroke={:.3}",
            self.excitation_time, force, stroke
        );
        Ok(observation)
    }
}
