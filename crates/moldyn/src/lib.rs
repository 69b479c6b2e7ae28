//! moldyn — differentiable molecular-energy engine.
//!
//! This is the umbrella crate: it re-exports the core types from the
//! sub-crates and provides the standard node registry.
//!
//! A graph of compute nodes evaluates a potential energy and, by
//! reverse-mode automatic differentiation, its gradient with respect to
//! every atomic position; the gradient drives velocity-Verlet or Predescu
//! integration of the positions and momenta.

pub use moldyn_config::{self, initialize_engine_from_str, initialize_engine_from_value};
pub use moldyn_diff::{self, gradient_deviation, relative_rms_deviation, ValueType};
pub use moldyn_engine::{
    self, integration_stage, recenter, ArgList, BuiltNode, ComputeMode, CoordPair, CoordState,
    DerivComputation, DerivEngine, EngineError, IntegratorType, NodeOutput, NodeRegistry,
    SlotMachine,
};
pub use moldyn_force::{self, AngleCoord, AngleSpring, DihedralSpring, DistSpring, HBondCount};
pub use moldyn_math::{self, Quat, Vec3, VecArray};

/// The registry holding every built-in node factory. Built once, before
/// any engine, and read-only afterwards.
pub fn standard_registry() -> moldyn_engine::Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    moldyn_force::register_builtin(&mut registry)?;
    Ok(registry)
}

/// Read the hydrogen-bond count from the counter node, if the engine has
/// one that exposes it.
pub fn get_n_hbond(engine: &DerivEngine) -> Option<f32> {
    engine
        .nodes()
        .iter()
        .find_map(|n| n.computation.get_value_by_name("n_hbond").ok())
        .and_then(|v| v.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_has_builtins() {
        let reg = standard_registry().unwrap();
        for name in [
            "dist_spring",
            "angle_coord",
            "angle_spring",
            "dihedral_spring",
            "hbond_count",
        ] {
            assert!(reg.lookup(name).is_some(), "missing factory for {name}");
        }
    }

    #[test]
    fn test_get_n_hbond_absent() {
        let engine = DerivEngine::new(3);
        assert_eq!(get_n_hbond(&engine), None);
    }
}
