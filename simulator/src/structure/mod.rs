//! Static structural models of the test bench.
//!
//! The twin only talks to a structure through [`StructuralModel`]: it applies
//! actuator loads and strokes between node pairs, runs an equilibrium solve and
//! reads back nodal displacements and forces.

pub mod bench;
pub mod frame;

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use thiserror::Error;

pub use bench::{bench_frame, response_vector};
pub use frame::{PlanarFrame, Section};

/// 1-based node label, as used on the bench drawings.
pub type NodeId = usize;
/// 1-based element label.
pub type ElementId = usize;

/// In-plane degrees of freedom of a frame node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dof {
    /// Horizontal translation.
    X,
    /// Vertical translation.
    Z,
    /// Rotation about the out-of-plane axis.
    Ry,
}

impl Dof {
    pub const ALL: [Dof; 3] = [Dof::X, Dof::Z, Dof::Ry];
    pub const PER_NODE: usize = 3;

    /// Offset of this dof within a node's block of the global vectors.
    pub fn offset(self) -> usize {
        match self {
            Dof::X => 0,
            Dof::Z => 1,
            Dof::Ry => 2,
        }
    }
}

/// Element properties that can be read or re-fitted by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementParameter {
    /// Young's modulus, `"E"` [N/mm^2].
    YoungsModulus,
    /// Cross-section area, `"A"` [mm^2].
    Area,
    /// In-plane second moment of area, `"I"` [mm^4].
    Inertia,
}

impl FromStr for ElementParameter {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "E" => Ok(Self::YoungsModulus),
            "A" => Ok(Self::Area),
            "I" => Ok(Self::Inertia),
            other => Err(ModelError::UnknownParameter(other.to_string())),
        }
    }
}

impl fmt::Display for ElementParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::YoungsModulus => write!(f, "E"),
            Self::Area => write!(f, "A"),
            Self::Inertia => write!(f, "I"),
        }
    }
}

/// Failure of the equilibrium solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverFailure {
    #[error("Stiffness matrix is singular ({free_dofs} free dofs)")]
    Singular { free_dofs: usize },

    #[error("Solution contains non-finite values")]
    NonFinite,
}

/// Errors from building or querying a model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown element {0}")]
    UnknownElement(ElementId),

    #[error("Unknown element parameter '{0}' (expected E, A or I)")]
    UnknownParameter(String),

    #[error("Invalid value {value} for parameter {name} of element {element}")]
    InvalidParameter {
        element: ElementId,
        name: ElementParameter,
        value: f64,
    },

    #[error("Element between nodes {0} and {1} has zero length")]
    DegenerateElement(NodeId, NodeId),

    #[error("Model has not been solved yet")]
    NotSolved,
}

/// Result of an equilibrium solve, in global dof order (`3 * (node - 1) + dof`).
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub displacements: DVector<f64>,
    /// Nodal forces `K u`, applied loads plus support reactions.
    pub forces: DVector<f64>,
    /// Reactions on constrained and prescribed dofs, zero elsewhere.
    pub reactions: DVector<f64>,
}

/// Interface the digital twin needs from a structural model.
pub trait StructuralModel {
    /// Apply an equal and opposite actuator load: `-force` on `nodes[0]` and
    /// `+force` on `nodes[1]`, both horizontal.
    fn set_load_between_nodes(&mut self, force: f64, nodes: [NodeId; 2])
        -> Result<(), ModelError>;

    /// Prescribe an actuator stroke: `nodes[0]` moves `-0.1 * displacement` and
    /// `nodes[1]` moves `+0.9 * displacement`, both vertical.
    fn set_displacement_between_nodes(
        &mut self,
        displacement: f64,
        nodes: [NodeId; 2],
    ) -> Result<(), ModelError>;

    /// Static equilibrium solve with the current loads and strokes.
    fn solve(&mut self) -> Result<Solution, SolverFailure>;

    /// Displacement of `node` along `dof` from the last successful solve.
    fn displacement(&self, node: NodeId, dof: Dof) -> Result<f64, ModelError>;

    /// Nodal force on `node` along `dof` from the last successful solve.
    fn load(&self, node: NodeId, dof: Dof) -> Result<f64, ModelError>;

    /// `u(b) - u(a)` for all three dofs.
    fn displacement_between_nodes(&self, a: NodeId, b: NodeId) -> Result<[f64; 3], ModelError> {
        let mut rel = [0.0; 3];
        for dof in Dof::ALL {
            rel[dof.offset()] = self.displacement(b, dof)? - self.displacement(a, dof)?;
        }
        Ok(rel)
    }

    fn element_parameter(&self, element: ElementId, name: &str) -> Result<f64, ModelError>;

    fn set_element_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: f64,
    ) -> Result<(), ModelError>;
}
