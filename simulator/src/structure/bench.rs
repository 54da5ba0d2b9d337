//! Geometry of the two-actuator hybrid test bench.
//!
//! A steel portal frame carries an aluminium specimen (element 16) between
//! nodes 10 and 11. The horizontal actuator acts between nodes 9 and 10 under
//! load control; the vertical actuator strokes node 10 against node 5 under
//! displacement control.

use super::frame::{PlanarFrame, Section};
use super::{Dof, ElementId, ModelError, NodeId, StructuralModel};

/// Short bottom beam [mm].
const LB1: f64 = 917.0;
/// Long bottom beam [mm].
const LB2: f64 = 1786.0;
/// Specimen length [mm].
const LB3: f64 = 603.0;
/// Short column [mm].
const LC1: f64 = 996.0;
/// Long column [mm].
const LC2: f64 = 1262.0 + 380.0;
const LS1: f64 = 266.0;
const LS2: f64 = 266.0;
const HS1: f64 = 321.0;
const HS2: f64 = 206.5;

pub const STEEL_MODULUS: f64 = 210e3;
pub const ALUMINIUM_MODULUS: f64 = 70e3;

/// Aluminium specimen strip, 80 x 5 mm.
pub const SPECIMEN_WIDTH: f64 = 80.0;
pub const SPECIMEN_THICKNESS: f64 = 5.0;
pub const SPECIMEN_AREA: f64 = SPECIMEN_WIDTH * SPECIMEN_THICKNESS;

pub const SPECIMEN_ELEMENT: ElementId = 16;
pub const HORIZONTAL_ACTUATOR: [NodeId; 2] = [9, 10];
pub const VERTICAL_ACTUATOR: [NodeId; 2] = [5, 10];
/// Node whose displacements and forces are reported.
pub const REPORT_NODE: NodeId = 10;

/// Build the bench frame with the given specimen modulus.
///
/// Node 1 is pinned and node 3 rests on a vertical roller.
pub fn bench_frame(specimen_modulus: f64) -> Result<PlanarFrame, ModelError> {
    let mut frame = PlanarFrame::new();
    let coords = [
        (0.0, 0.0),
        (LB1, 0.0),
        (LB2, 0.0),
        (LB1, LC1 - HS1),
        (LB1 + LS1, LC1 - HS1),
        (0.0, LC1),
        (LB1 - HS2, LC1),
        (LB1, LC1),
        (LB1 - HS2, LC1 + LS2),
        (LB2 - LB3, LC1 + LS2),
        (LB2, LC1 + LS2),
        (0.0, LC2),
        (LB2, LC2),
    ];
    for (x, z) in coords {
        frame.add_node(x, z);
    }

    let column = Section::hollow_rectangle(STEEL_MODULUS, 150.0, 100.0, 5.0);
    let bracket = Section::hollow_rectangle(STEEL_MODULUS, 40.0, 60.0, 5.0);
    let specimen = Section::solid_rectangle(specimen_modulus, SPECIMEN_WIDTH, SPECIMEN_THICKNESS);

    // The bottom beam between nodes 2 and 3 is doubled.
    let frame_members: [[NodeId; 2]; 11] = [
        [1, 2],
        [2, 3],
        [2, 3],
        [1, 6],
        [2, 4],
        [4, 8],
        [3, 11],
        [11, 13],
        [6, 7],
        [7, 8],
        [12, 13],
    ];
    let brackets: [[NodeId; 2]; 4] = [[7, 9], [9, 8], [4, 5], [5, 8]];

    for nodes in frame_members {
        frame.add_element(nodes, column)?;
    }
    for nodes in brackets {
        frame.add_element(nodes, bracket)?;
    }
    let id = frame.add_element([10, 11], specimen)?;
    debug_assert_eq!(id, SPECIMEN_ELEMENT);

    frame.add_support(1, Dof::X)?;
    frame.add_support(1, Dof::Z)?;
    frame.add_support(3, Dof::Z)?;

    Ok(frame)
}

/// Actuator response of a solved bench model:
/// `[horizontal stroke, vertical stroke, horizontal force, vertical force]`.
///
/// Same order as `PhysicalObservation::response_vector`.
pub fn response_vector<M: StructuralModel + ?Sized>(model: &M) -> Result<[f64; 4], ModelError> {
    let [h_from, h_to] = HORIZONTAL_ACTUATOR;
    let [v_from, v_to] = VERTICAL_ACTUATOR;
    Ok([
        model.displacement_between_nodes(h_from, h_to)?[Dof::X.offset()],
        model.displacement_between_nodes(v_from, v_to)?[Dof::Z.offset()],
        model.load(REPORT_NODE, Dof::X)?,
        model.load(REPORT_NODE, Dof::Z)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solved_bench(modulus: f64, force: f64, stroke: f64) -> PlanarFrame {
        let mut frame = bench_frame(modulus).unwrap();
        frame
            .set_load_between_nodes(force, HORIZONTAL_ACTUATOR)
            .unwrap();
        frame
            .set_displacement_between_nodes(stroke, VERTICAL_ACTUATOR)
            .unwrap();
        frame.solve().unwrap();
        frame
    }

    #[test]
    fn test_bench_topology() {
        let frame = bench_frame(ALUMINIUM_MODULUS).unwrap();
        assert_eq!(frame.node_count(), 13);
        assert_eq!(frame.element_count(), 16);
        assert_relative_eq!(
            frame.element_parameter(SPECIMEN_ELEMENT, "E").unwrap(),
            ALUMINIUM_MODULUS
        );
        assert_relative_eq!(
            frame.element_parameter(SPECIMEN_ELEMENT, "A").unwrap(),
            SPECIMEN_AREA
        );
    }

    #[test]
    fn test_actuators_reproduce_their_commands() {
        let frame = solved_bench(ALUMINIUM_MODULUS, 100.0, 20.0);
        let response = response_vector(&frame).unwrap();

        // Vertical stroke is prescribed, horizontal force is applied
        assert_relative_eq!(response[1], 20.0, max_relative = 1e-9);
        assert_relative_eq!(response[2], 100.0, max_relative = 1e-6);
        assert_relative_eq!(
            frame.displacement(REPORT_NODE, Dof::Z).unwrap(),
            18.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_unloaded_bench_is_at_rest() {
        let frame = solved_bench(ALUMINIUM_MODULUS, 0.0, 0.0);
        let response = response_vector(&frame).unwrap();
        for value in response {
            assert_relative_eq!(value, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_stiffer_specimen_carries_more_load() {
        let soft = response_vector(&solved_bench(70e3, 0.0, 20.0)).unwrap();
        let stiff = response_vector(&solved_bench(100e3, 0.0, 20.0)).unwrap();
        assert!(stiff[3].abs() > soft[3].abs());
    }

    #[test]
    fn test_stiffer_specimen_stretches_less() {
        let soft = response_vector(&solved_bench(70e3, 100.0, 0.0)).unwrap();
        let stiff = response_vector(&solved_bench(100e3, 100.0, 0.0)).unwrap();
        assert!(soft[0] > 0.0);
        assert!(stiff[0] < soft[0]);
    }

    #[test]
    fn test_response_is_linear_in_the_load() {
        let single = response_vector(&solved_bench(70e3, 100.0, 10.0)).unwrap();
        let double = response_vector(&solved_bench(70e3, 200.0, 20.0)).unwrap();
        for (s, d) in single.iter().zip(double.iter()) {
            assert_relative_eq!(2.0 * s, *d, max_relative = 1e-6, epsilon = 1e-9);
        }
    }
}
