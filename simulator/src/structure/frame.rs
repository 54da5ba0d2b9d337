//! Linear-elastic planar frame (Euler-Bernoulli beams in the x-z plane).

use nalgebra::{DMatrix, DVector, Matrix3, Matrix6};
use tracing::{debug, trace};

use super::{
    Dof, ElementId, ElementParameter, ModelError, NodeId, Solution, SolverFailure,
    StructuralModel,
};

/// Share of an actuator stroke taken up by each end, `[a, b]`.
const STROKE_SPLIT: [f64; 2] = [-0.1, 0.9];

/// Squared pivot ratio of the Cholesky factor below which the free-dof
/// stiffness is treated as singular.
const SINGULARITY_THRESHOLD: f64 = 1e-13;

/// Material and cross-section properties of a beam element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    /// Young's modulus [N/mm^2].
    pub youngs_modulus: f64,
    /// Area [mm^2].
    pub area: f64,
    /// In-plane second moment of area [mm^4].
    pub inertia: f64,
}

impl Section {
    /// Rectangular hollow section of outer `width` x `height` and wall thickness `wall`.
    pub fn hollow_rectangle(youngs_modulus: f64, width: f64, height: f64, wall: f64) -> Self {
        let inner_w = width - 2.0 * wall;
        let inner_h = height - 2.0 * wall;
        Self {
            youngs_modulus,
            area: width * height - inner_w * inner_h,
            inertia: width * height.powi(3) / 12.0 - inner_w * inner_h.powi(3) / 12.0,
        }
    }

    /// Solid rectangular section, bending about the axis parallel to `width`.
    pub fn solid_rectangle(youngs_modulus: f64, width: f64, height: f64) -> Self {
        Self {
            youngs_modulus,
            area: width * height,
            inertia: width * height.powi(3) / 12.0,
        }
    }

    fn get(&self, parameter: ElementParameter) -> f64 {
        match parameter {
            ElementParameter::YoungsModulus => self.youngs_modulus,
            ElementParameter::Area => self.area,
            ElementParameter::Inertia => self.inertia,
        }
    }

    fn set(&mut self, parameter: ElementParameter, value: f64) {
        match parameter {
            ElementParameter::YoungsModulus => self.youngs_modulus = value,
            ElementParameter::Area => self.area = value,
            ElementParameter::Inertia => self.inertia = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
    x: f64,
    z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Element {
    nodes: [NodeId; 2],
    section: Section,
}

/// Planar frame with three dofs per node and static analysis.
///
/// Nodes and elements are labelled from 1 in insertion order. Actuator loads
/// and strokes are keyed by their node pair, so setting the same pair again
/// replaces the previous value.
#[derive(Debug, Clone, Default)]
pub struct PlanarFrame {
    nodes: Vec<Node>,
    elements: Vec<Element>,
    supports: Vec<(NodeId, Dof)>,
    actuator_loads: Vec<([NodeId; 2], f64)>,
    actuator_strokes: Vec<([NodeId; 2], f64)>,
    solution: Option<Solution>,
}

impl PlanarFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at `(x, z)` [mm] and return its label.
    pub fn add_node(&mut self, x: f64, z: f64) -> NodeId {
        self.nodes.push(Node { x, z });
        self.nodes.len()
    }

    pub fn add_element(
        &mut self,
        nodes: [NodeId; 2],
        section: Section,
    ) -> Result<ElementId, ModelError> {
        let a = self.node(nodes[0])?;
        let b = self.node(nodes[1])?;
        if (b.x - a.x).hypot(b.z - a.z) <= 0.0 {
            return Err(ModelError::DegenerateElement(nodes[0], nodes[1]));
        }
        self.elements.push(Element { nodes, section });
        Ok(self.elements.len())
    }

    /// Fix `dof` of `node` at zero.
    pub fn add_support(&mut self, node: NodeId, dof: Dof) -> Result<(), ModelError> {
        self.node(node)?;
        if !self.supports.contains(&(node, dof)) {
            self.supports.push((node, dof));
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn dof_count(&self) -> usize {
        self.nodes.len() * Dof::PER_NODE
    }

    /// Last successful solve, if any.
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        id.checked_sub(1)
            .and_then(|i| self.nodes.get(i))
            .ok_or(ModelError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: ElementId) -> Result<&mut Element, ModelError> {
        id.checked_sub(1)
            .and_then(|i| self.elements.get_mut(i))
            .ok_or(ModelError::UnknownElement(id))
    }

    /// Global index of a dof; `node` must already be validated.
    fn index(node: NodeId, dof: Dof) -> usize {
        (node - 1) * Dof::PER_NODE + dof.offset()
    }

    fn checked_index(&self, node: NodeId, dof: Dof) -> Result<usize, ModelError> {
        self.node(node)?;
        Ok(Self::index(node, dof))
    }

    /// Element stiffness in global coordinates, dof order
    /// `[a.x, a.z, a.ry, b.x, b.z, b.ry]`.
    fn element_stiffness(&self, element: &Element) -> Matrix6<f64> {
        let a = self.nodes[element.nodes[0] - 1];
        let b = self.nodes[element.nodes[1] - 1];
        let (dx, dz) = (b.x - a.x, b.z - a.z);
        let l = dx.hypot(dz);
        let (c, s) = (dx / l, dz / l);

        let Section {
            youngs_modulus: e,
            area,
            inertia,
        } = element.section;
        let ea = e * area / l;
        let k1 = 12.0 * e * inertia / l.powi(3);
        let k2 = 6.0 * e * inertia / l.powi(2);
        let k3 = 4.0 * e * inertia / l;
        let k4 = 2.0 * e * inertia / l;

        let mut local = Matrix6::zeros();
        local[(0, 0)] = ea;
        local[(0, 3)] = -ea;
        local[(3, 0)] = -ea;
        local[(3, 3)] = ea;

        local[(1, 1)] = k1;
        local[(1, 2)] = k2;
        local[(1, 4)] = -k1;
        local[(1, 5)] = k2;
        local[(2, 1)] = k2;
        local[(2, 2)] = k3;
        local[(2, 4)] = -k2;
        local[(2, 5)] = k4;
        local[(4, 1)] = -k1;
        local[(4, 2)] = -k2;
        local[(4, 4)] = k1;
        local[(4, 5)] = -k2;
        local[(5, 1)] = k2;
        local[(5, 2)] = k4;
        local[(5, 4)] = -k2;
        local[(5, 5)] = k3;

        let rotation = Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0);
        let mut t = Matrix6::zeros();
        t.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        t.fixed_view_mut::<3, 3>(3, 3).copy_from(&rotation);

        t.transpose() * local * t
    }

    /// Assembled global stiffness matrix.
    pub fn stiffness_matrix(&self) -> DMatrix<f64> {
        let n = self.dof_count();
        let mut k = DMatrix::<f64>::zeros(n, n);
        for element in &self.elements {
            let ke = self.element_stiffness(element);
            let dofs: Vec<usize> = element
                .nodes
                .iter()
                .flat_map(|&node| Dof::ALL.map(|dof| Self::index(node, dof)))
                .collect();
            for (r, &gr) in dofs.iter().enumerate() {
                for (c, &gc) in dofs.iter().enumerate() {
                    k[(gr, gc)] += ke[(r, c)];
                }
            }
        }
        k
    }

    fn solved(&self) -> Result<&Solution, ModelError> {
        self.solution.as_ref().ok_or(ModelError::NotSolved)
    }
}

fn upsert(entries: &mut Vec<([NodeId; 2], f64)>, nodes: [NodeId; 2], value: f64) {
    match entries.iter_mut().find(|(pair, _)| *pair == nodes) {
        Some(entry) => entry.1 = value,
        None => entries.push((nodes, value)),
    }
}

impl StructuralModel for PlanarFrame {
    fn set_load_between_nodes(
        &mut self,
        force: f64,
        nodes: [NodeId; 2],
    ) -> Result<(), ModelError> {
        self.node(nodes[0])?;
        self.node(nodes[1])?;
        upsert(&mut self.actuator_loads, nodes, force);
        Ok(())
    }

    fn set_displacement_between_nodes(
        &mut self,
        displacement: f64,
        nodes: [NodeId; 2],
    ) -> Result<(), ModelError> {
        self.node(nodes[0])?;
        self.node(nodes[1])?;
        upsert(&mut self.actuator_strokes, nodes, displacement);
        Ok(())
    }

    fn solve(&mut self) -> Result<Solution, SolverFailure> {
        let n = self.dof_count();
        let k = self.stiffness_matrix();

        let mut applied = DVector::<f64>::zeros(n);
        for &(pair, force) in &self.actuator_loads {
            applied[Self::index(pair[0], Dof::X)] -= force;
            applied[Self::index(pair[1], Dof::X)] += force;
        }

        let mut constrained = vec![false; n];
        let mut u = DVector::<f64>::zeros(n);
        for &(node, dof) in &self.supports {
            constrained[Self::index(node, dof)] = true;
        }
        for &(pair, stroke) in &self.actuator_strokes {
            for (node, share) in pair.into_iter().zip(STROKE_SPLIT) {
                let i = Self::index(node, Dof::Z);
                constrained[i] = true;
                u[i] = share * stroke;
            }
        }

        let free: Vec<usize> = (0..n).filter(|&i| !constrained[i]).collect();
        if !free.is_empty() {
            let ku = &k * &u;
            let k_ff = DMatrix::from_fn(free.len(), free.len(), |r, c| k[(free[r], free[c])]);
            let rhs = DVector::from_fn(free.len(), |r, _| applied[free[r]] - ku[free[r]]);

            let singular = SolverFailure::Singular {
                free_dofs: free.len(),
            };
            let chol = k_ff.cholesky().ok_or(singular.clone())?;
            let pivots = chol.l_dirty().diagonal().map(|d| d * d);
            if pivots.min() <= pivots.max() * SINGULARITY_THRESHOLD {
                return Err(singular);
            }
            let u_free = chol.solve(&rhs);
            for (r, &i) in free.iter().enumerate() {
                u[i] = u_free[r];
            }
        }

        if u.iter().any(|v| !v.is_finite()) {
            return Err(SolverFailure::NonFinite);
        }

        let forces = &k * &u;
        let reactions = DVector::from_fn(n, |i, _| {
            if constrained[i] {
                forces[i] - applied[i]
            } else {
                0.0
            }
        });
        trace!("frame solve: {} dofs, {} free", n, free.len());

        let solution = Solution {
            displacements: u,
            forces,
            reactions,
        };
        self.solution = Some(solution.clone());
        Ok(solution)
    }

    fn displacement(&self, node: NodeId, dof: Dof) -> Result<f64, ModelError> {
        let i = self.checked_index(node, dof)?;
        Ok(self.solved()?.displacements[i])
    }

    fn load(&self, node: NodeId, dof: Dof) -> Result<f64, ModelError> {
        let i = self.checked_index(node, dof)?;
        Ok(self.solved()?.forces[i])
    }

    fn element_parameter(&self, element: ElementId, name: &str) -> Result<f64, ModelError> {
        let parameter: ElementParameter = name.parse()?;
        let e = element
            .checked_sub(1)
            .and_then(|i| self.elements.get(i))
            .ok_or(ModelError::UnknownElement(element))?;
        Ok(e.section.get(parameter))
    }

    fn set_element_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: f64,
    ) -> Result<(), ModelError> {
        let parameter: ElementParameter = name.parse()?;
        if !value.is_finite() || value <= 0.0 {
            return Err(ModelError::InvalidParameter {
                element,
                name: parameter,
                value,
            });
        }
        self.element_mut(element)?.section.set(parameter, value);
        debug!("element {} {} = {}", element, parameter, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const E: f64 = 210e3;
    const L: f64 = 1000.0;

    fn steel() -> Section {
        Section::hollow_rectangle(E, 150.0, 100.0, 5.0)
    }

    fn clamp(frame: &mut PlanarFrame, node: NodeId) {
        for dof in Dof::ALL {
            frame.add_support(node, dof).unwrap();
        }
    }

    #[test]
    fn test_hollow_section_properties() {
        let s = steel();
        assert_relative_eq!(s.area, 150.0 * 100.0 - 140.0 * 90.0);
        assert_relative_eq!(
            s.inertia,
            150.0 * 100.0_f64.powi(3) / 12.0 - 140.0 * 90.0_f64.powi(3) / 12.0
        );
    }

    #[test]
    fn test_axial_bar() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(L, 0.0);
        frame.add_element([a, b], steel()).unwrap();
        clamp(&mut frame, a);

        frame.set_load_between_nodes(1000.0, [a, b]).unwrap();
        frame.solve().unwrap();

        let s = steel();
        assert_relative_eq!(
            frame.displacement(b, Dof::X).unwrap(),
            1000.0 * L / (E * s.area),
            max_relative = 1e-9
        );
        assert_relative_eq!(frame.load(b, Dof::X).unwrap(), 1000.0, max_relative = 1e-9);
        assert_relative_eq!(frame.displacement(b, Dof::Z).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vertical_cantilever_tip_load() {
        let mut frame = PlanarFrame::new();
        let base = frame.add_node(0.0, 0.0);
        let tip = frame.add_node(0.0, L);
        frame.add_element([base, tip], steel()).unwrap();
        clamp(&mut frame, base);

        let p = 500.0;
        frame.set_load_between_nodes(p, [base, tip]).unwrap();
        let solution = frame.solve().unwrap();

        let s = steel();
        assert_relative_eq!(
            frame.displacement(tip, Dof::X).unwrap(),
            p * L.powi(3) / (3.0 * E * s.inertia),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            frame.displacement(tip, Dof::Ry).unwrap().abs(),
            p * L.powi(2) / (2.0 * E * s.inertia),
            max_relative = 1e-9
        );
        // Base reaction balances the tip load
        let base_x = (base - 1) * Dof::PER_NODE;
        assert_relative_eq!(solution.forces[base_x], -p, max_relative = 1e-9);
        assert_relative_eq!(solution.reactions[base_x], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_prescribed_stroke_on_cantilever() {
        let mut frame = PlanarFrame::new();
        let root = frame.add_node(0.0, 0.0);
        let tip = frame.add_node(L, 0.0);
        let anchor = frame.add_node(L, -100.0);
        frame.add_element([root, tip], steel()).unwrap();
        clamp(&mut frame, root);
        frame.add_support(anchor, Dof::X).unwrap();
        frame.add_support(anchor, Dof::Ry).unwrap();

        let d = 10.0;
        frame.set_displacement_between_nodes(d, [anchor, tip]).unwrap();
        frame.solve().unwrap();

        assert_relative_eq!(frame.displacement(tip, Dof::Z).unwrap(), 0.9 * d);
        assert_relative_eq!(frame.displacement(anchor, Dof::Z).unwrap(), -0.1 * d);
        assert_relative_eq!(
            frame.displacement_between_nodes(anchor, tip).unwrap()[1],
            d,
            max_relative = 1e-12
        );
        let s = steel();
        assert_relative_eq!(
            frame.load(tip, Dof::Z).unwrap(),
            3.0 * E * s.inertia * 0.9 * d / L.powi(3),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_loaded_and_stroked_bench_is_in_equilibrium() {
        let mut frame = crate::structure::bench_frame(70e3).unwrap();
        frame.set_load_between_nodes(100.0, [9, 10]).unwrap();
        frame.set_displacement_between_nodes(10.0, [5, 10]).unwrap();
        let solution = frame.solve().unwrap();

        let n = frame.node_count();
        let sum = |dof: Dof| -> f64 {
            (0..n)
                .map(|node| solution.forces[node * Dof::PER_NODE + dof.offset()])
                .sum()
        };
        assert_relative_eq!(sum(Dof::X), 0.0, epsilon = 1e-3);
        assert_relative_eq!(sum(Dof::Z), 0.0, epsilon = 1e-3);

        // The loaded dof is free, so it carries the load and no reaction
        let loaded = (10 - 1) * Dof::PER_NODE + Dof::X.offset();
        assert_relative_eq!(solution.forces[loaded], 100.0, max_relative = 1e-9);
        assert_eq!(solution.reactions[loaded], 0.0);
    }

    #[test]
    fn test_setting_the_same_actuator_replaces_the_load() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(L, 0.0);
        frame.add_element([a, b], steel()).unwrap();
        clamp(&mut frame, a);

        frame.set_load_between_nodes(1000.0, [a, b]).unwrap();
        frame.set_load_between_nodes(250.0, [a, b]).unwrap();
        frame.solve().unwrap();
        assert_relative_eq!(frame.load(b, Dof::X).unwrap(), 250.0, max_relative = 1e-9);
    }

    #[test]
    fn test_unsupported_frame_is_singular() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(L, 0.0);
        frame.add_element([a, b], steel()).unwrap();
        frame.set_load_between_nodes(10.0, [a, b]).unwrap();

        assert!(matches!(
            frame.solve(),
            Err(SolverFailure::Singular { free_dofs: 6 })
        ));
        assert!(frame.solution().is_none());
        assert_eq!(frame.displacement(b, Dof::X), Err(ModelError::NotSolved));
    }

    #[test]
    fn test_stiffness_matrix_is_symmetric() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(300.0, 400.0);
        let c = frame.add_node(900.0, 400.0);
        frame.add_element([a, b], steel()).unwrap();
        frame.add_element([b, c], steel()).unwrap();
        let k = frame.stiffness_matrix();
        assert_relative_eq!(k.clone(), k.transpose(), max_relative = 1e-12);
    }

    #[test]
    fn test_element_parameters() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(L, 0.0);
        let id = frame.add_element([a, b], steel()).unwrap();

        frame.set_element_parameter(id, "E", 70e3).unwrap();
        assert_relative_eq!(frame.element_parameter(id, "E").unwrap(), 70e3);
        assert!(matches!(
            frame.element_parameter(id, "nu"),
            Err(ModelError::UnknownParameter(_))
        ));
        assert_eq!(
            frame.set_element_parameter(7, "E", 1.0),
            Err(ModelError::UnknownElement(7))
        );
        assert!(matches!(
            frame.set_element_parameter(id, "A", -1.0),
            Err(ModelError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_invalid_topology() {
        let mut frame = PlanarFrame::new();
        let a = frame.add_node(0.0, 0.0);
        let b = frame.add_node(0.0, 0.0);
        assert_eq!(
            frame.add_element([a, b], steel()),
            Err(ModelError::DegenerateElement(a, b))
        );
        assert_eq!(
            frame.add_element([a, 9], steel()),
            Err(ModelError::UnknownNode(9))
        );
        assert_eq!(frame.add_support(0, Dof::X), Err(ModelError::UnknownNode(0)));
    }
}
