//! Concrete physics nodes for the moldyn energy engine.
//!
//! Every node here plugs into the graph through the creation registry:
//! a factory parses its parameters from a configuration group, registers
//! its dependencies on the argument nodes, and returns the built node.
//!
//! The set covers each shape of consumer the scaffolding supports: direct
//! position consumers ([`DistSpring`], [`DihedralSpring`],
//! [`HBondCount`]), a derived coordinate node ([`AngleCoord`]), and a
//! second-level consumer of derived coordinates ([`AngleSpring`]).

pub mod angle;
pub mod hbond;
pub mod spring;

pub use angle::AngleCoord;
pub use hbond::HBondCount;
pub use spring::{AngleSpring, DihedralSpring, DistSpring};

use moldyn_engine::{factory_fixed, NodeRegistry, Result};

/// Register every built-in node factory under its name prefix.
pub fn register_builtin(registry: &mut NodeRegistry) -> Result<()> {
    registry.register("dist_spring", factory_fixed(1, DistSpring::from_group))?;
    registry.register("angle_coord", factory_fixed(1, AngleCoord::from_group))?;
    registry.register("angle_spring", factory_fixed(1, AngleSpring::from_group))?;
    registry.register("dihedral_spring", factory_fixed(1, DihedralSpring::from_group))?;
    registry.register("hbond_count", factory_fixed(1, HBondCount::from_group))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin_prefixes() {
        let mut reg = NodeRegistry::new();
        register_builtin(&mut reg).unwrap();
        assert!(reg.lookup("dist_spring_backbone").is_some());
        assert!(reg.lookup("hbond_count").is_some());
        assert!(reg.lookup("unknown_node").is_none());
    }

    #[test]
    fn test_register_builtin_twice_fails() {
        let mut reg = NodeRegistry::new();
        register_builtin(&mut reg).unwrap();
        assert!(register_builtin(&mut reg).is_err());
    }
}
