//! Digital twin of the hybrid test bench.
//!
//! The twin mirrors the physical bench in a structural model: each tick it
//! plans the actuator trajectories, keeps them synchronised with the bench
//! readings, re-fits the specimen stiffness and tracks its fatigue damage.
//! [`sync_loop::SyncLoop`] ties these together; [`emulation::EmulatorService`]
//! stands in for the bench when no hardware is attached.

pub mod actuator;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod emulation;
pub mod estimation;
pub mod fatigue;
pub mod schedule;
pub mod sync_loop;

pub use config::TwinConfig;
pub use sync_loop::{ExcitationState, SetupError, SyncLoop, TickContext, TickError};
