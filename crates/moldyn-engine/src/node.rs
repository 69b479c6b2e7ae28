//! The compute-node contract shared by every node in the graph.

use crate::engine::ArgList;
use crate::error::{EngineError, Result};
use crate::slot::{CoordPair, SlotMachine};
use moldyn_math::VecArray;

/// Whether a forward pass must produce a correct potential value as well as
/// correct derivatives. In `DerivOnly` mode a node may skip the scalar
/// accumulation if that is cheaper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeMode {
    DerivOnly,
    PotentialAndDeriv,
}

/// Buffers owned by a coordinate-producing node: its output, the
/// sensitivity accumulated by the reverse pass, and the slot machine
/// downstream consumers deposit into.
pub struct CoordState {
    pub n_elem: usize,
    pub elem_width: usize,
    pub output: VecArray,
    pub sens: VecArray,
    pub machine: SlotMachine,
}

impl CoordState {
    /// Allocate zeroed buffers for `n_elem` elements of width `elem_width`.
    pub fn new(n_elem: usize, elem_width: usize) -> Self {
        Self {
            n_elem,
            elem_width,
            output: VecArray::new(elem_width, n_elem),
            sens: VecArray::new(elem_width, n_elem),
            machine: SlotMachine::new(elem_width),
        }
    }

    /// Register a downstream dependency on element `pair.index`, checked
    /// against this node's element count.
    pub fn add_request(&mut self, output_width: usize, pair: &mut CoordPair) -> Result<()> {
        if pair.index as usize >= self.n_elem {
            return Err(EngineError::Shape(format!(
                "dependency on element {} of a node with {} elements",
                pair.index, self.n_elem
            )));
        }
        self.machine.add_request(output_width, pair);
        Ok(())
    }
}

/// What a node produces: coordinates with their derivative plumbing, or a
/// scalar potential.
pub enum NodeOutput {
    Coord(CoordState),
    Potential(f32),
}

impl NodeOutput {
    /// True for potential-producing nodes.
    pub fn is_potential(&self) -> bool {
        matches!(self, NodeOutput::Potential(_))
    }

    /// Coordinate buffers, if this is a coordinate node.
    pub fn coord(&self) -> Option<&CoordState> {
        match self {
            NodeOutput::Coord(c) => Some(c),
            NodeOutput::Potential(_) => None,
        }
    }

    /// Mutable coordinate buffers, if this is a coordinate node.
    pub fn coord_mut(&mut self) -> Option<&mut CoordState> {
        match self {
            NodeOutput::Coord(c) => Some(c),
            NodeOutput::Potential(_) => None,
        }
    }

    /// The scalar potential, if this is a potential node.
    pub fn potential(&self) -> Option<f32> {
        match self {
            NodeOutput::Potential(v) => Some(*v),
            NodeOutput::Coord(_) => None,
        }
    }
}

/// A differentiable computation node.
///
/// `forward` reads its arguments' outputs and writes its own output (or
/// potential). Potential nodes also deposit their derivative into their
/// arguments' slot machines here, since the sensitivity of the potential to
/// itself is 1. Coordinate nodes deposit in `reverse`, combining their
/// gathered sensitivity with Jacobians cached during `forward`.
pub trait DerivComputation {
    /// Read inputs, write output. Deposit derivatives too if this is a
    /// potential node.
    fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput);

    /// Use the sensitivity to this node's output to add to the
    /// sensitivities of its inputs. The default no-op is correct for
    /// potential nodes and leaves.
    fn reverse(&mut self, own: &NodeOutput, args: &mut ArgList<'_>) {
        let _ = (own, args);
    }

    /// Return an arbitrary subset of parameters.
    fn get_param(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Set the same subset of parameters returned by `get_param`.
    fn set_param(&mut self, _new_params: &[f32]) {}

    /// Derivative of the potential with respect to `get_param`.
    fn get_param_deriv(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Compute a named quantity.
    fn get_value_by_name(&self, name: &str) -> Result<Vec<f32>> {
        Err(EngineError::Query(name.to_string()))
    }

    /// Registered dependency pairs on argument `arg`, grouped by output
    /// element (term). Used for Jacobian extraction; nodes that do not
    /// support gradient checking may return an empty list.
    fn coord_pairs(&self, _arg: usize) -> Vec<Vec<CoordPair>> {
        Vec::new()
    }
}

/// The unique leaf coordinate node holding atomic positions. Its output is
/// written by the integrator and its sensitivity accumulates dU/dx, so both
/// passes are no-ops here.
pub struct Pos;

impl DerivComputation for Pos {
    fn forward(&mut self, _mode: ComputeMode, _args: &mut ArgList<'_>, _out: &mut NodeOutput) {}
}
