//! Fatigue bookkeeping for the specimen: rainflow counting of the horizontal
//! load and the damage it accumulates.

pub mod damage;
pub mod rainflow;

pub use damage::{effective_modulus, miner_damage, FatigueConfig, SnCurve};
pub use rainflow::{Cycle, Direction, Flow, RainflowCounter};
