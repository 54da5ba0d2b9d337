#![doc = include_str!("../README.md")]

use serde::{Deserialize, Serialize};

/// Bus topic names used by the twin and the physical bench.
pub mod topics {
    /// Operator commands addressed to the digital twin.
    pub const COMMANDS: &str = "hybridtestbench.forces.dt";
    /// Operator commands addressed to the physical twin.
    pub const PHYSICAL_COMMANDS: &str = "hybridtestbench.forces.on";
    /// Actuator readings published by the physical twin (or its emulator).
    pub const OBSERVATIONS: &str = "hybridtestbench.displacement";
    /// Per-tick state published by the digital twin.
    pub const TWIN_STATE: &str = "hybridtestbench.record.dt.state";
}

/// Timestamp in microseconds since the initialization of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create timestamp from microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Create timestamp from (fractional) seconds.
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds.max(0.0) * 1e6).round() as u64)
    }

    /// Get timestamp as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get timestamp as seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * 1e-6
    }
}

/// The two actuator axes driven by the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal actuator, load controlled [N].
    Horizontal,
    /// Vertical actuator, displacement controlled [mm].
    Vertical,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Horizontal, Axis::Vertical];

    /// Index into per-axis arrays.
    pub fn index(self) -> usize {
        match self {
            Axis::Horizontal => 0,
            Axis::Vertical => 1,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Horizontal => write!(f, "horizontal"),
            Axis::Vertical => write!(f, "vertical"),
        }
    }
}

/// Position and velocity of one actuator axis.
///
/// "Position" is the controlled quantity of the axis, which is a force for the
/// horizontal actuator and a displacement for the vertical one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisState {
    pub position: f64,
    pub velocity: f64,
}

impl AxisState {
    pub fn new(position: f64, velocity: f64) -> Self {
        Self { position, velocity }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// Operator command for the bench.
///
/// Absent fields mean "no change".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchCommand {
    /// Enable or disable cyclic excitation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excitation_on: Option<bool>,
    /// Horizontal load amplitude [N].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_force_amplitude: Option<f64>,
    /// Vertical displacement amplitude [mm].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_displacement_amplitude: Option<f64>,
    /// Horizontal excitation period [min].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_period: Option<f64>,
    /// Vertical excitation period [min].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_period: Option<f64>,
}

impl BenchCommand {
    /// Command that only toggles excitation.
    pub fn excitation(on: bool) -> Self {
        Self {
            excitation_on: Some(on),
            ..Self::default()
        }
    }

    /// True when the command carries no field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Actuator readings from the physical structure.
///
/// Displacements are actuator strokes (relative displacement between the
/// actuator's end nodes); forces are the actuator load cell readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicalObservation {
    pub horizontal_displacement: f64,
    pub vertical_displacement: f64,
    pub horizontal_force: f64,
    pub vertical_force: f64,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl PhysicalObservation {
    /// Observed response in the order the calibrator compares it:
    /// `[horizontal stroke, vertical stroke, horizontal force, vertical force]`.
    pub fn response_vector(&self) -> [f64; 4] {
        [
            self.horizontal_displacement,
            self.vertical_displacement,
            self.horizontal_force,
            self.vertical_force,
        ]
    }

    /// Observed value of the quantity an axis controls.
    pub fn controlled_value(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Horizontal => self.horizontal_force,
            Axis::Vertical => self.vertical_displacement,
        }
    }
}

/// State published by the digital twin once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TwinState {
    /// Horizontal displacement at the reporting node [mm].
    pub horizontal_displacement: f64,
    /// Vertical displacement at the reporting node [mm].
    pub vertical_displacement: f64,
    /// Horizontal force at the reporting node [N].
    pub horizontal_force: f64,
    /// Vertical force at the reporting node [N].
    pub vertical_force: f64,
    /// Horizontal actuator stroke [mm].
    pub horizontal_displacement_between: f64,
    /// Vertical actuator stroke [mm].
    pub vertical_displacement_between: f64,
    /// Current specimen modulus in the structural model [N/mm^2].
    pub effective_modulus: f64,
    /// Accumulated Palmgren-Miner damage index.
    pub damage: f64,
    pub excitation_on: bool,
    pub max_vertical_displacement: f64,
    /// Particle filter position spread of the last estimate, per axis.
    pub position_uncertainty: [f64; 2],
    pub tick_latency_seconds: f64,
    pub timestamp: Timestamp,
}

impl TwinState {
    /// State reported while excitation is off: all kinematic fields are zero.
    pub fn at_rest(effective_modulus: f64, damage: f64, max_vertical_displacement: f64) -> Self {
        Self {
            effective_modulus,
            damage,
            max_vertical_displacement,
            ..Self::default()
        }
    }
}
