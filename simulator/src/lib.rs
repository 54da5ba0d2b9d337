//! Structural side of the hybrid test bench.
//!
//! [`structure`] holds the [`StructuralModel`](structure::StructuralModel)
//! interface used by the digital twin and the planar frame model of the bench.
//! [`emulator`] replays the physical bench against that model so the twin can be
//! exercised without hardware.

pub mod emulator;
pub mod structure;
