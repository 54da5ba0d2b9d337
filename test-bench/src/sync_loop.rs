//! The digital twin's control loop.
//!
//! One [`SyncLoop::tick`] ingests operator commands and bench observations,
//! pulls drifting planners back onto the observed bench through the particle
//! filters, re-fits the specimen, advances both actuator trajectories through
//! the structural model, counts fatigue cycles and publishes the twin state.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proto_control::{topics, Axis, AxisState, BenchCommand, PhysicalObservation, Timestamp, TwinState};
use shared::messaging::{drain_json, publish_json, MessageBus, MessagingError};
use simulator::structure::bench::{
    HORIZONTAL_ACTUATOR, REPORT_NODE, SPECIMEN_ELEMENT, VERTICAL_ACTUATOR,
};
use simulator::structure::{Dof, ModelError, SolverFailure, StructuralModel};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actuator::{MotionPlanner, PlannerError};
use crate::calibration::{CalibrationError, Calibrator};
use crate::config::{InvalidConfig, TwinConfig};
use crate::estimation::{AxisEstimator, EstimatorError};
use crate::fatigue::{effective_modulus, miner_damage, RainflowCounter, SnCurve};
use crate::schedule::{run_fixed_rate, RunSummary};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] InvalidConfig),

    #[error("Planner setup failed: {0}")]
    Planner(#[from] PlannerError),

    #[error("Calibrator setup failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

#[derive(Error, Debug)]
pub enum TickError {
    #[error("{axis} planner failed: {source}")]
    Planner {
        axis: Axis,
        #[source]
        source: PlannerError,
    },

    #[error("{axis} estimator failed: {source}")]
    Estimator {
        axis: Axis,
        #[source]
        source: EstimatorError,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Structural solve failed: {0}")]
    Solve(#[from] SolverFailure),

    #[error("Failed to publish twin state: {0}")]
    Publish(#[from] MessagingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcitationState {
    Off,
    /// Excitation on, no observation processed since it was enabled.
    Unsynced,
    /// Entered on the first observation after enabling, whether it agreed
    /// with the planners or forced a resync.
    Synced,
}

/// What one tick has to work with.
#[derive(Debug, Clone, PartialEq)]
pub struct TickContext {
    pub tick: u64,
    pub excitation_on: bool,
    /// Last command received this tick.
    pub command: Option<BenchCommand>,
    /// Newest observation received this tick.
    pub observation: Option<PhysicalObservation>,
    /// Ticks since the previous tick that carried an observation.
    pub elapsed_steps: u64,
}

/// Model outputs read back after the structural solve.
#[derive(Debug, Clone, Copy)]
struct ModelOutputs {
    horizontal_displacement: f64,
    vertical_displacement: f64,
    horizontal_force: f64,
    vertical_force: f64,
    horizontal_displacement_between: f64,
    vertical_displacement_between: f64,
}

pub struct SyncLoop<M: StructuralModel> {
    config: TwinConfig,
    model: M,
    bus: Arc<dyn MessageBus>,
    planners: [MotionPlanner; 2],
    estimators: [AxisEstimator; 2],
    calibrator: Option<Calibrator>,
    rainflow: RainflowCounter,
    curve: SnCurve,
    /// Specimen modulus fatigue damage is applied to. Calibration replaces it
    /// with the fitted modulus, which already reflects the damage, so once
    /// damage is non-zero the next reversal lowers the published modulus below
    /// the fitted value until the following calibration restores it.
    reference_modulus: f64,
    damage: f64,
    state: ExcitationState,
    tick: u64,
    last_observation_tick: Option<u64>,
    uncertainty: [f64; 2],
    epoch: Instant,
}

impl<M: StructuralModel> SyncLoop<M> {
    pub fn new(config: TwinConfig, model: M, bus: Arc<dyn MessageBus>) -> Result<Self, SetupError> {
        config.validate()?;

        let planner = |axis: Axis, amplitude: f64, period: f64| {
            MotionPlanner::new(
                axis,
                amplitude,
                period,
                config.limit_margin,
                config.execution_interval,
            )
        };
        let planners = [
            planner(
                Axis::Horizontal,
                config.horizontal_force_amplitude,
                config.horizontal_period,
            )?,
            planner(
                Axis::Vertical,
                config.vertical_displacement_amplitude,
                config.vertical_period,
            )?,
        ];
        let estimators = Axis::ALL.map(|axis| {
            AxisEstimator::new(config.estimator, config.estimator.seed + axis.index() as u64)
        });
        let calibrator = if config.calibration.enabled {
            Some(Calibrator::new(&config.calibration)?)
        } else {
            None
        };
        let reference_modulus = model.element_parameter(SPECIMEN_ELEMENT, "E")?;

        Ok(Self {
            curve: SnCurve::new(config.fatigue.detail_category),
            config,
            model,
            bus,
            planners,
            estimators,
            calibrator,
            rainflow: RainflowCounter::new(),
            reference_modulus,
            damage: 0.0,
            state: ExcitationState::Off,
            tick: 0,
            last_observation_tick: None,
            uncertainty: [0.0; 2],
            epoch: Instant::now(),
        })
    }

    pub fn state(&self) -> ExcitationState {
        self.state
    }

    pub fn planner(&self, axis: Axis) -> &MotionPlanner {
        &self.planners[axis.index()]
    }

    pub fn estimator(&self, axis: Axis) -> &AxisEstimator {
        &self.estimators[axis.index()]
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn rainflow(&self) -> &RainflowCounter {
        &self.rainflow
    }

    pub fn damage(&self) -> f64 {
        self.damage
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Run one tick and publish its state.
    pub fn tick(&mut self) -> Result<TwinState, TickError> {
        let started = Instant::now();
        self.tick += 1;
        let context = self.ingest();
        debug!(
            "tick {}: excitation {}, command {:?}, observation {} ({} ticks since the last)",
            context.tick,
            context.excitation_on,
            context.command,
            context.observation.is_some(),
            context.elapsed_steps
        );

        if !context.excitation_on {
            let state = TwinState {
                tick_latency_seconds: started.elapsed().as_secs_f64(),
                timestamp: self.timestamp(),
                ..TwinState::at_rest(
                    self.specimen_modulus()?,
                    self.damage,
                    self.config.max_vertical_displacement,
                )
            };
            publish_json(self.bus.as_ref(), topics::TWIN_STATE, &state)?;
            return Ok(state);
        }

        if let Some(observation) = &context.observation {
            self.synchronise(observation, context.tick)?;
            self.calibrate(observation);
        }

        let outputs = self.drive_model()?;
        self.track_fatigue(outputs.horizontal_force)?;

        let state = TwinState {
            horizontal_displacement: outputs.horizontal_displacement,
            vertical_displacement: outputs.vertical_displacement,
            horizontal_force: outputs.horizontal_force,
            vertical_force: outputs.vertical_force,
            horizontal_displacement_between: outputs.horizontal_displacement_between,
            vertical_displacement_between: outputs.vertical_displacement_between,
            effective_modulus: self.specimen_modulus()?,
            damage: self.damage,
            excitation_on: true,
            max_vertical_displacement: self.config.max_vertical_displacement,
            position_uncertainty: self.uncertainty,
            tick_latency_seconds: started.elapsed().as_secs_f64(),
            timestamp: self.timestamp(),
        };
        publish_json(self.bus.as_ref(), topics::TWIN_STATE, &state)?;
        Ok(state)
    }

    /// Tick at the configured period until `shutdown` is set or `max_ticks`
    /// ticks have run.
    pub fn run(&mut self, shutdown: &AtomicBool, max_ticks: Option<u64>) -> RunSummary {
        let period = Duration::from_secs_f64(self.config.execution_interval);
        info!(
            "twin loop running every {:.3}s",
            self.config.execution_interval
        );
        let summary = run_fixed_rate("twin", period, shutdown, max_ticks, || {
            self.tick().map(|_| ())
        });
        info!(
            "twin loop stopped after {} ticks ({} overruns, {} errors)",
            summary.ticks, summary.overruns, summary.errors
        );
        summary
    }

    /// Apply every pending command in order and pick up the newest
    /// observation.
    fn ingest(&mut self) -> TickContext {
        let commands: Vec<BenchCommand> = drain_json(self.bus.as_ref(), topics::COMMANDS)
            .unwrap_or_else(|e| {
                debug!("no commands: {}", e);
                Vec::new()
            });
        for command in &commands {
            self.apply_command(command);
        }

        let observation = drain_json::<_, PhysicalObservation>(self.bus.as_ref(), topics::OBSERVATIONS)
            .unwrap_or_else(|e| {
                debug!("no observations: {}", e);
                Vec::new()
            })
            .pop();

        let elapsed_steps = match (&observation, self.last_observation_tick) {
            (Some(_), Some(last)) => self.tick - last,
            _ => 0,
        };
        if observation.is_some() {
            self.last_observation_tick = Some(self.tick);
        }

        TickContext {
            tick: self.tick,
            excitation_on: self.state != ExcitationState::Off,
            command: commands.last().copied(),
            observation,
            elapsed_steps,
        }
    }

    fn apply_command(&mut self, command: &BenchCommand) {
        match (command.excitation_on, self.state) {
            (Some(true), ExcitationState::Off) => {
                info!("excitation on");
                self.state = ExcitationState::Unsynced;
                self.estimators.iter_mut().for_each(AxisEstimator::reset);
                self.planners.iter_mut().for_each(MotionPlanner::reset);
                self.uncertainty = [0.0; 2];
            }
            (Some(false), ExcitationState::Unsynced | ExcitationState::Synced) => {
                info!("excitation off");
                self.state = ExcitationState::Off;
            }
            _ => {}
        }

        if let Some(amplitude) = command.horizontal_force_amplitude {
            self.adjust(Axis::Horizontal, |p| p.set_amplitude(amplitude));
        }
        if let Some(amplitude) = command.vertical_displacement_amplitude {
            self.adjust(Axis::Vertical, |p| p.set_amplitude(amplitude));
        }
        if let Some(period) = command.horizontal_period {
            self.adjust(Axis::Horizontal, |p| p.set_period(period));
        }
        if let Some(period) = command.vertical_period {
            self.adjust(Axis::Vertical, |p| p.set_period(period));
        }
    }

    fn adjust<F>(&mut self, axis: Axis, change: F)
    where
        F: FnOnce(&mut MotionPlanner) -> Result<(), PlannerError>,
    {
        if let Err(e) = change(&mut self.planners[axis.index()]) {
            warn!("ignoring {} command: {}", axis, e);
        }
    }

    /// Resync every axis whose last commanded position drifted too far from
    /// the observation.
    fn synchronise(&mut self, observation: &PhysicalObservation, tick: u64) -> Result<(), TickError> {
        for axis in Axis::ALL {
            let i = axis.index();
            let observed = observation.controlled_value(axis);
            let planner = &self.planners[i];
            let drift = (planner.last_commanded() - observed).abs();
            let threshold = self.config.drift_threshold * planner.limits().amplitude;
            if drift <= threshold {
                continue;
            }

            warn!(
                "{} axis drifted {:.3} from the bench (threshold {:.3}), resyncing",
                axis, drift, threshold
            );
            let estimate = self.estimators[i]
                .estimate(planner, observed, tick)
                .map_err(|source| TickError::Estimator { axis, source })?;
            self.uncertainty[i] = estimate.position_std;
            self.planners[i].resync(estimate.mean_position);
        }

        if self.state == ExcitationState::Unsynced {
            info!("twin synchronised with the bench");
            self.state = ExcitationState::Synced;
        }
        Ok(())
    }

    fn calibrate(&mut self, observation: &PhysicalObservation) {
        let Some(calibrator) = self.calibrator.as_mut() else {
            return;
        };
        match calibrator.calibrate(&mut self.model, &observation.response_vector()) {
            Ok(outcome) => {
                debug!(
                    "calibration cost {:.3e} (converged: {})",
                    outcome.cost, outcome.converged
                );
                match self.model.element_parameter(SPECIMEN_ELEMENT, "E") {
                    Ok(modulus) => self.reference_modulus = modulus,
                    Err(e) => warn!("cannot read calibrated modulus: {}", e),
                }
            }
            Err(e) => warn!("calibration failed: {}", e),
        }
    }

    /// Load the model with the next planner positions and solve. The planners
    /// only advance once the solve has succeeded.
    fn drive_model(&mut self) -> Result<ModelOutputs, TickError> {
        let mut next = [AxisState::default(); 2];
        for axis in Axis::ALL {
            next[axis.index()] = self.planners[axis.index()]
                .predict()
                .map_err(|source| TickError::Planner { axis, source })?;
        }

        self.model
            .set_load_between_nodes(next[Axis::Horizontal.index()].position, HORIZONTAL_ACTUATOR)?;
        self.model
            .set_displacement_between_nodes(next[Axis::Vertical.index()].position, VERTICAL_ACTUATOR)?;
        self.model.solve()?;

        let [h_from, h_to] = HORIZONTAL_ACTUATOR;
        let [v_from, v_to] = VERTICAL_ACTUATOR;
        let outputs = ModelOutputs {
            horizontal_displacement: self.model.displacement(REPORT_NODE, Dof::X)?,
            vertical_displacement: self.model.displacement(REPORT_NODE, Dof::Z)?,
            horizontal_force: self.model.load(REPORT_NODE, Dof::X)?,
            vertical_force: self.model.load(REPORT_NODE, Dof::Z)?,
            horizontal_displacement_between: self
                .model
                .displacement_between_nodes(h_from, h_to)?[Dof::X.offset()],
            vertical_displacement_between: self
                .model
                .displacement_between_nodes(v_from, v_to)?[Dof::Z.offset()],
        };

        for (planner, state) in self.planners.iter_mut().zip(next) {
            planner.commit(state);
        }
        Ok(outputs)
    }

    /// Count the horizontal load and, on a new reversal, degrade the specimen
    /// by the accumulated damage.
    fn track_fatigue(&mut self, horizontal_force: f64) -> Result<(), TickError> {
        if !self.rainflow.observe(horizontal_force) {
            return Ok(());
        }
        let cycles = self.rainflow.cycles();
        self.damage = miner_damage(&cycles, &self.curve, self.config.fatigue.section_area);
        let modulus = effective_modulus(
            self.reference_modulus,
            self.damage,
            self.config.fatigue.residual_fraction,
        );
        self.model
            .set_element_parameter(SPECIMEN_ELEMENT, "E", modulus)?;
        debug!(
            "reversal at {:.1} N: damage {:.3e}, modulus {:.1}",
            horizontal_force, self.damage, modulus
        );
        Ok(())
    }

    fn specimen_modulus(&self) -> Result<f64, ModelError> {
        self.model.element_parameter(SPECIMEN_ELEMENT, "E")
    }

    fn timestamp(&self) -> Timestamp {
        Timestamp::from_micros(self.epoch.elapsed().as_micros() as u64)
    }
}
