//! The graph engine: node list, topological scheduling, forward evaluation
//! and reverse gradient propagation.
//!
//! Nodes are created and linked once, at engine construction. Edges are
//! stored as indices, never references: a consumer holds only its parents'
//! indices plus the slots it was assigned, so the reverse pass can write
//! into upstream accumulators without aliasing.

use crate::error::{EngineError, Result};
use crate::node::{ComputeMode, CoordState, DerivComputation, NodeOutput, Pos};
use crate::slot::{CoordPair, SlotMachine};
use log::debug;
use moldyn_math::VecArray;

/// Index of the position node in every engine.
pub const POS_NODE: usize = 0;

/// A computation plus the output buffers it will own in the graph.
pub struct BuiltNode {
    pub computation: Box<dyn DerivComputation>,
    pub output: NodeOutput,
}

impl BuiltNode {
    /// A coordinate-producing node with `n_elem` elements of `elem_width`.
    pub fn coord(computation: Box<dyn DerivComputation>, n_elem: usize, elem_width: usize) -> Self {
        Self {
            computation,
            output: NodeOutput::Coord(CoordState::new(n_elem, elem_width)),
        }
    }

    /// A potential-producing node.
    pub fn potential(computation: Box<dyn DerivComputation>) -> Self {
        Self {
            computation,
            output: NodeOutput::Potential(0.0),
        }
    }
}

/// One entry of the graph: a named computation with its buffers, edges, and
/// scheduling levels.
pub struct GraphNode {
    pub name: String,
    pub computation: Box<dyn DerivComputation>,
    pub output: NodeOutput,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub forward_level: u32,
    pub reverse_level: u32,
}

/// Read access to a node's argument outputs plus deposit access to their
/// slot machines. Handed to computations during construction (for
/// `add_request`) and during both passes.
pub struct ArgList<'a> {
    nodes: &'a mut [GraphNode],
    parents: &'a [usize],
}

impl<'a> ArgList<'a> {
    pub(crate) fn new(nodes: &'a mut [GraphNode], parents: &'a [usize]) -> Self {
        Self { nodes, parents }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    fn coord(&self, k: usize) -> &CoordState {
        match &self.nodes[self.parents[k]].output {
            NodeOutput::Coord(c) => c,
            NodeOutput::Potential(_) => unreachable!("arguments are checked to produce coordinates"),
        }
    }

    fn coord_mut(&mut self, k: usize) -> &mut CoordState {
        match &mut self.nodes[self.parents[k]].output {
            NodeOutput::Coord(c) => c,
            NodeOutput::Potential(_) => unreachable!("arguments are checked to produce coordinates"),
        }
    }

    /// Element count of argument `k`.
    pub fn n_elem(&self, k: usize) -> usize {
        self.coord(k).n_elem
    }

    /// Element width of argument `k`.
    pub fn elem_width(&self, k: usize) -> usize {
        self.coord(k).elem_width
    }

    /// Output buffer of argument `k`.
    pub fn output(&self, k: usize) -> &VecArray {
        &self.coord(k).output
    }

    /// Slot machine of argument `k`, for deposits.
    pub fn machine(&mut self, k: usize) -> &mut SlotMachine {
        &mut self.coord_mut(k).machine
    }

    /// Register a dependency on element `pair.index` of argument `k`.
    pub fn add_request(&mut self, k: usize, output_width: usize, pair: &mut CoordPair) -> Result<()> {
        self.coord_mut(k).add_request(output_width, pair)
    }
}

/// The graph engine. Node 0 is always the position node.
pub struct DerivEngine {
    nodes: Vec<GraphNode>,
    n_atom: usize,
    /// Sum of all potential-node outputs after the last `compute`.
    pub potential: f32,
}

impl std::fmt::Debug for DerivEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivEngine")
            .field("n_nodes", &self.nodes.len())
            .field("n_atom", &self.n_atom)
            .field("potential", &self.potential)
            .finish()
    }
}

impl DerivEngine {
    /// A fresh graph holding only `Pos(n_atom)`.
    pub fn new(n_atom: usize) -> Self {
        let pos = GraphNode {
            name: "pos".to_string(),
            computation: Box::new(Pos),
            output: NodeOutput::Coord(CoordState::new(n_atom, 3)),
            parents: Vec::new(),
            children: Vec::new(),
            forward_level: 0,
            reverse_level: 0,
        };
        Self {
            nodes: vec![pos],
            n_atom,
            potential: 0.0,
        }
    }

    /// Number of atoms in the position node.
    pub fn n_atom(&self) -> usize {
        self.n_atom
    }

    /// All graph entries, in creation order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Append a node. `build` receives the resolved argument list so the
    /// computation can register its dependencies; it runs only after every
    /// argument name has been resolved and checked.
    pub fn add_node(
        &mut self,
        name: &str,
        argument_names: &[&str],
        build: impl FnOnce(&mut ArgList<'_>) -> Result<BuiltNode>,
    ) -> Result<usize> {
        if self.get_idx(name).is_some() {
            return Err(EngineError::Configuration(format!(
                "duplicate node name '{name}'"
            )));
        }
        let mut parents = Vec::with_capacity(argument_names.len());
        for arg in argument_names {
            let idx = self.get_idx(arg).ok_or_else(|| {
                EngineError::Configuration(format!("unknown argument '{arg}' for node '{name}'"))
            })?;
            if !matches!(self.nodes[idx].output, NodeOutput::Coord(_)) {
                return Err(EngineError::Configuration(format!(
                    "argument '{arg}' of node '{name}' does not produce coordinates"
                )));
            }
            parents.push(idx);
        }
        let forward_level = parents
            .iter()
            .map(|&p| self.nodes[p].forward_level + 1)
            .max()
            .unwrap_or(0);

        let built = {
            let mut args = ArgList::new(&mut self.nodes, &parents);
            build(&mut args)?
        };

        let idx = self.nodes.len();
        for &p in &parents {
            self.nodes[p].children.push(idx);
        }
        debug!("added node '{name}' at forward level {forward_level}");
        self.nodes.push(GraphNode {
            name: name.to_string(),
            computation: built.computation,
            output: built.output,
            parents,
            children: Vec::new(),
            forward_level,
            reverse_level: 0,
        });
        Ok(idx)
    }

    /// Linear lookup by name.
    pub fn get(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Index of the node named `name`, if present.
    pub fn get_idx(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Index of the node named `name`, or a configuration error.
    pub fn require_idx(&self, name: &str) -> Result<usize> {
        self.get_idx(name)
            .ok_or_else(|| EngineError::Configuration(format!("no node named '{name}'")))
    }

    /// Query a named value on a named node.
    pub fn node_value(&self, node: &str, value: &str) -> Result<Vec<f32>> {
        let idx = self.require_idx(node)?;
        self.nodes[idx].computation.get_value_by_name(value)
    }

    /// The position node's buffers.
    pub fn pos(&self) -> &CoordState {
        match &self.nodes[POS_NODE].output {
            NodeOutput::Coord(c) => c,
            NodeOutput::Potential(_) => unreachable!("node 0 is the position node"),
        }
    }

    /// Mutable access to the position node's buffers.
    pub fn pos_mut(&mut self) -> &mut CoordState {
        match &mut self.nodes[POS_NODE].output {
            NodeOutput::Coord(c) => c,
            NodeOutput::Potential(_) => unreachable!("node 0 is the position node"),
        }
    }

    /// Coordinate buffers of node `idx`, if it is a coordinate node.
    pub fn coord_state(&self, idx: usize) -> Option<&CoordState> {
        self.nodes.get(idx).and_then(|n| n.output.coord())
    }

    /// Mutable coordinate buffers of node `idx`.
    pub fn coord_state_mut(&mut self, idx: usize) -> Option<&mut CoordState> {
        self.nodes.get_mut(idx).and_then(|n| n.output.coord_mut())
    }

    /// Reverse levels depend on the finished children lists, so they are
    /// recomputed from the sinks up before every traversal.
    fn assign_reverse_levels(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            let level = {
                let node = &self.nodes[i];
                node.children
                    .iter()
                    .map(|&c| self.nodes[c].reverse_level + 1)
                    .max()
                    .unwrap_or(0)
            };
            self.nodes[i].reverse_level = level;
        }
    }

    fn forward_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| (self.nodes[i].forward_level, i));
        order
    }

    fn reverse_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| (self.nodes[i].reverse_level, i));
        order
    }

    /// Zero every sensitivity buffer and every deposit block.
    pub fn reset_derivatives(&mut self) {
        for node in &mut self.nodes {
            if let NodeOutput::Coord(cs) = &mut node.output {
                cs.sens.fill(0.0);
                cs.machine.zero_accum();
            }
        }
    }

    /// Run one node's forward pass in isolation. Used by the full
    /// traversal and by the gradient-check utility.
    pub fn forward_node(&mut self, idx: usize, mode: ComputeMode) {
        let (before, rest) = self.nodes.split_at_mut(idx);
        let GraphNode {
            computation,
            output,
            parents,
            ..
        } = &mut rest[0];
        let mut args = ArgList::new(before, parents);
        computation.forward(mode, &mut args, output);
    }

    /// Gather the deposits in one node's accumulator onto its sensitivity.
    pub fn gather_node(&mut self, idx: usize) -> Result<()> {
        if let NodeOutput::Coord(cs) = &mut self.nodes[idx].output {
            let CoordState { machine, sens, .. } = cs;
            machine.gather(sens)?;
        }
        Ok(())
    }

    /// Run one node's deposit pass in isolation (no gather). Used by the
    /// full traversal and by the gradient-check utility with seeded
    /// sensitivities.
    pub fn propagate_node(&mut self, idx: usize) {
        let (before, rest) = self.nodes.split_at_mut(idx);
        let GraphNode {
            computation,
            output,
            parents,
            ..
        } = &mut rest[0];
        let mut args = ArgList::new(before, parents);
        computation.reverse(output, &mut args);
    }

    /// Evaluate the graph: zero the derivative state, run every node's
    /// forward pass in ascending forward level, sum the potentials, then
    /// run the reverse traversal in ascending reverse level. Afterwards
    /// `pos().sens` holds dU/dx for every atom.
    ///
    /// The reverse traversal runs in both modes; `DerivOnly` only permits
    /// nodes to skip the scalar potential accumulation.
    pub fn compute(&mut self, mode: ComputeMode) -> Result<()> {
        self.assign_reverse_levels();
        self.reset_derivatives();

        let order = self.forward_order();
        for &i in &order {
            self.forward_node(i, mode);
        }

        self.potential = self.nodes.iter().filter_map(|n| n.output.potential()).sum();
        if mode == ComputeMode::PotentialAndDeriv && !self.potential.is_finite() {
            return Err(EngineError::Numerical(format!(
                "potential is not finite ({})",
                self.potential
            )));
        }

        let order = self.reverse_order();
        for &i in &order {
            self.gather_node(i)?;
            self.propagate_node(i);
        }

        if !self.pos().sens.is_finite() {
            return Err(EngineError::Numerical(
                "non-finite force on the position node".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Test coordinate node: output = c * input, elementwise.
    struct Scale {
        c: f32,
        width: usize,
        pairs: Vec<CoordPair>,
    }

    impl Scale {
        fn build(args: &mut ArgList<'_>, c: f32) -> Result<BuiltNode> {
            let n = args.n_elem(0);
            let w = args.elem_width(0);
            let mut pairs = Vec::with_capacity(n);
            for e in 0..n {
                let mut p = CoordPair::new(e as u32);
                args.add_request(0, w, &mut p)?;
                pairs.push(p);
            }
            Ok(BuiltNode::coord(
                Box::new(Scale { c, width: w, pairs }),
                n,
                w,
            ))
        }
    }

    impl DerivComputation for Scale {
        fn forward(&mut self, _mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
            let cs = out.coord_mut().unwrap();
            for (e, p) in self.pairs.iter().enumerate() {
                for d in 0..self.width {
                    cs.output[(d, e)] = self.c * args.output(0)[(d, p.index as usize)];
                }
            }
        }

        fn reverse(&mut self, own: &NodeOutput, args: &mut ArgList<'_>) {
            let cs = own.coord().unwrap();
            let mut col = vec![0.0; self.width];
            for (e, p) in self.pairs.iter().enumerate() {
                for r in 0..self.width {
                    col.fill(0.0);
                    col[r] = self.c * cs.sens[(r, e)];
                    args.machine(0).deposit(p.slot + r as u32, &col);
                }
            }
        }

        fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
            if arg == 0 {
                self.pairs.iter().map(|&p| vec![p]).collect()
            } else {
                Vec::new()
            }
        }
    }

    /// Test potential node: U = 0.5 sum |x_e|^2.
    struct SumSq {
        width: usize,
        pairs: Vec<CoordPair>,
    }

    impl SumSq {
        fn build(args: &mut ArgList<'_>) -> Result<BuiltNode> {
            let n = args.n_elem(0);
            let w = args.elem_width(0);
            let mut pairs = Vec::with_capacity(n);
            for e in 0..n {
                let mut p = CoordPair::new(e as u32);
                args.add_request(0, 1, &mut p)?;
                pairs.push(p);
            }
            Ok(BuiltNode::potential(Box::new(SumSq { width: w, pairs })))
        }
    }

    impl DerivComputation for SumSq {
        fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
            let mut pot = 0.0;
            let mut col = vec![0.0; self.width];
            for p in &self.pairs {
                for (d, c) in col.iter_mut().enumerate() {
                    let x = args.output(0)[(d, p.index as usize)];
                    *c = x;
                    pot += 0.5 * x * x;
                }
                args.machine(0).deposit(p.slot, &col);
            }
            if mode == ComputeMode::PotentialAndDeriv {
                if let NodeOutput::Potential(v) = out {
                    *v = pot;
                }
            }
        }

        fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
            if arg == 0 {
                self.pairs.iter().map(|&p| vec![p]).collect()
            } else {
                Vec::new()
            }
        }
    }

    fn seeded_engine(n_atom: usize) -> DerivEngine {
        let mut engine = DerivEngine::new(n_atom);
        for e in 0..n_atom {
            engine
                .pos_mut()
                .output
                .store_vec3(e, moldyn_math::Vec3::new(e as f32, 0.5 * e as f32, -1.0));
        }
        engine
    }

    #[test]
    fn test_unknown_argument_is_configuration_error() {
        let mut engine = DerivEngine::new(2);
        let err = engine
            .add_node("k", &["does_not_exist"], |args| SumSq::build(args))
            .unwrap_err();
        match err {
            EngineError::Configuration(msg) => assert!(msg.contains("does_not_exist")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut engine = DerivEngine::new(2);
        engine
            .add_node("u", &["pos"], |args| SumSq::build(args))
            .unwrap();
        let err = engine
            .add_node("u", &["pos"], |args| SumSq::build(args))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_levels_follow_paths() {
        let mut engine = seeded_engine(3);
        engine
            .add_node("a", &["pos"], |args| Scale::build(args, 2.0))
            .unwrap();
        engine
            .add_node("b", &["a"], |args| SumSq::build(args))
            .unwrap();
        engine
            .add_node("c", &["pos"], |args| SumSq::build(args))
            .unwrap();
        engine.assign_reverse_levels();

        let level = |name: &str| {
            let n = engine.get(name).unwrap();
            (n.forward_level, n.reverse_level)
        };
        assert_eq!(level("pos"), (0, 2));
        assert_eq!(level("a"), (1, 1));
        assert_eq!(level("b"), (2, 0));
        assert_eq!(level("c"), (1, 0));

        // Every edge satisfies both ordering invariants.
        for (i, node) in engine.nodes().iter().enumerate() {
            for &c in &node.children {
                assert!(engine.nodes()[i].forward_level < engine.nodes()[c].forward_level);
                assert!(engine.nodes()[c].reverse_level < engine.nodes()[i].reverse_level);
            }
        }
    }

    #[test]
    fn test_chain_rule_through_two_levels() {
        // U = 0.5 |c x|^2 + 0.5 |x|^2, so dU/dx = (c^2 + 1) x.
        let c = 2.0;
        let mut engine = seeded_engine(3);
        engine
            .add_node("scaled", &["pos"], |args| Scale::build(args, c))
            .unwrap();
        engine
            .add_node("u_scaled", &["scaled"], |args| SumSq::build(args))
            .unwrap();
        engine
            .add_node("u_plain", &["pos"], |args| SumSq::build(args))
            .unwrap();
        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();

        let mut expected_pot = 0.0;
        for e in 0..3 {
            let x = engine.pos().output.load_vec3(e);
            expected_pot += 0.5 * (c * c + 1.0) * x.norm_squared();
            let g = engine.pos().sens.load_vec3(e);
            let expect = x * (c * c + 1.0);
            assert_relative_eq!(g.x, expect.x, epsilon = 1e-5);
            assert_relative_eq!(g.y, expect.y, epsilon = 1e-5);
            assert_relative_eq!(g.z, expect.z, epsilon = 1e-5);
        }
        assert_relative_eq!(engine.potential, expected_pot, epsilon = 1e-4);
    }

    #[test]
    fn test_repeated_compute_is_bit_identical() {
        let mut engine = seeded_engine(4);
        engine
            .add_node("scaled", &["pos"], |args| Scale::build(args, -1.5))
            .unwrap();
        engine
            .add_node("u", &["scaled"], |args| SumSq::build(args))
            .unwrap();

        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let pot1 = engine.potential;
        let mut sens1 = vec![0.0; 4 * 3];
        engine.pos().sens.copy_to_buffer(&mut sens1);

        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let mut sens2 = vec![0.0; 4 * 3];
        engine.pos().sens.copy_to_buffer(&mut sens2);

        assert_eq!(pot1.to_bits(), engine.potential.to_bits());
        for (a, b) in sens1.iter().zip(&sens2) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_non_finite_positions_surface_as_numerical_error() {
        let mut engine = seeded_engine(2);
        engine
            .add_node("u", &["pos"], |args| SumSq::build(args))
            .unwrap();
        engine.pos_mut().output[(0, 0)] = f32::NAN;
        let err = engine.compute(ComputeMode::PotentialAndDeriv).unwrap_err();
        assert!(matches!(err, EngineError::Numerical(_)));
    }

    #[test]
    fn test_potential_only_argument_rejected() {
        let mut engine = seeded_engine(2);
        engine
            .add_node("u", &["pos"], |args| SumSq::build(args))
            .unwrap();
        let err = engine
            .add_node("v", &["u"], |args| SumSq::build(args))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
