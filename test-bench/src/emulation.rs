//! Bus-facing wrapper that runs the bench emulator as a service.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use proto_control::{topics, BenchCommand, PhysicalObservation};
use shared::messaging::{drain_json, publish_json, MessageBus, MessagingError};
use simulator::emulator::{EmulatorError, PhysicalTwinEmulator};
use thiserror::Error;
use tracing::debug;

use crate::schedule::{run_fixed_rate, RunSummary};

#[derive(Error, Debug)]
pub enum EmulationError {
    #[error("Emulator failed: {0}")]
    Emulator(#[from] EmulatorError),

    #[error("Failed to publish observation: {0}")]
    Publish(#[from] MessagingError),
}

/// Plays the physical bench: takes commands from
/// [`topics::PHYSICAL_COMMANDS`] and answers with actuator readings on
/// [`topics::OBSERVATIONS`] once per tick.
pub struct EmulatorService {
    emulator: PhysicalTwinEmulator,
    bus: Arc<dyn MessageBus>,
}

impl EmulatorService {
    pub fn new(emulator: PhysicalTwinEmulator, bus: Arc<dyn MessageBus>) -> Self {
        Self { emulator, bus }
    }

    pub fn emulator(&self) -> &PhysicalTwinEmulator {
        &self.emulator
    }

    pub fn emulator_mut(&mut self) -> &mut PhysicalTwinEmulator {
        &mut self.emulator
    }

    pub fn tick(&mut self) -> Result<PhysicalObservation, EmulationError> {
        let commands: Vec<BenchCommand> =
            drain_json(self.bus.as_ref(), topics::PHYSICAL_COMMANDS).unwrap_or_else(|e| {
                debug!("no bench commands: {}", e);
                Vec::new()
            });
        for command in &commands {
            self.emulator.apply_command(command);
        }

        let observation = self.emulator.step(None)?;
        publish_json(self.bus.as_ref(), topics::OBSERVATIONS, &observation)?;
        Ok(observation)
    }

    pub fn run(
        &mut self,
        period: Duration,
        shutdown: &AtomicBool,
        max_ticks: Option<u64>,
    ) -> RunSummary {
        run_fixed_rate("emulator", period, shutdown, max_ticks, || {
            self.tick().map(|_| ())
        })
    }
}
