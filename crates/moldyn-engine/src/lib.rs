//! Differentiable molecular-energy graph engine.
//!
//! A directed acyclic graph of compute nodes jointly evaluates a scalar
//! potential energy as a function of atomic coordinates and, via
//! reverse-mode automatic differentiation, the gradient of that potential
//! with respect to every atomic position. The gradient drives the
//! symplectic integrators in [`integrator`].
//!
//! The moving parts:
//!
//! - [`slot`] — the per-node derivative tape. Consumers register
//!   dependencies at construction and receive exclusive deposit slots in
//!   their inputs' accumulators.
//! - [`node`] — the `DerivComputation` contract: `forward` and `reverse`
//!   over coordinate- or potential-producing nodes.
//! - [`engine`] — `DerivEngine`: topological levels, forward evaluation,
//!   reverse gradient propagation.
//! - [`integrator`] — velocity-Verlet and the Predescu variant, with force
//!   clipping and recentering.
//! - [`registry`] — name-prefix to node-factory mapping used by the
//!   configuration loader.

pub mod engine;
pub mod error;
pub mod integrator;
pub mod node;
pub mod params;
pub mod registry;
pub mod slot;

pub use engine::{ArgList, BuiltNode, DerivEngine, GraphNode, POS_NODE};
pub use error::{EngineError, Result};
pub use integrator::{integration_stage, recenter, IntegratorType, PREDESCU_A};
pub use node::{ComputeMode, CoordState, DerivComputation, NodeOutput, Pos};
pub use registry::{
    check_arguments_length, check_elem_width, check_elem_width_lower_bound, factory_fixed,
    factory_variadic, is_prefix, NodeFactory, NodeRegistry,
};
pub use slot::{AutoDiffParams, CoordPair, DerivRecord, SlotMachine, SLOT_SENTINEL};
