//! Smooth hydrogen-bond counting.

use moldyn_engine::{
    check_elem_width, params, ArgList, BuiltNode, ComputeMode, CoordPair, DerivComputation,
    EngineError, NodeOutput, Result,
};
use moldyn_math::Vec3;
use serde_json::Value;

/// Counts donor-acceptor contacts with a logistic switching function and
/// charges `energy` per (fractional) bond:
///
///   n = sum sigma(steepness * (r0 - r)),  U = energy * n.
///
/// The count is exposed through `get_value_by_name("n_hbond")`.
pub struct HBondCount {
    donors: Vec<CoordPair>,
    acceptors: Vec<CoordPair>,
    r0: f32,
    steepness: f32,
    energy: f32,
    n_hbond: f32,
}

impl HBondCount {
    pub fn new(
        args: &mut ArgList<'_>,
        donors: &[usize],
        acceptors: &[usize],
        r0: f32,
        steepness: f32,
        energy: f32,
    ) -> Result<Self> {
        check_elem_width(args, 0, 3)?;
        if donors.is_empty() || acceptors.is_empty() {
            return Err(EngineError::Configuration(
                "hbond_count needs at least one donor and one acceptor".to_string(),
            ));
        }
        let mut donor_pairs = Vec::with_capacity(donors.len());
        for &d in donors {
            let mut p = CoordPair::new(d as u32);
            args.add_request(0, 1, &mut p)?;
            donor_pairs.push(p);
        }
        let mut acceptor_pairs = Vec::with_capacity(acceptors.len());
        for &a in acceptors {
            let mut p = CoordPair::new(a as u32);
            args.add_request(0, 1, &mut p)?;
            acceptor_pairs.push(p);
        }
        Ok(Self {
            donors: donor_pairs,
            acceptors: acceptor_pairs,
            r0,
            steepness,
            energy,
            n_hbond: -1.0,
        })
    }

    pub fn from_group(grp: &Value, args: &mut ArgList<'_>) -> Result<BuiltNode> {
        let donors = params::array_index(grp, "donors")?;
        let acceptors = params::array_index(grp, "acceptors")?;
        let r0 = params::scalar_f32(grp, "r0")?;
        let steepness = params::scalar_f32_or(grp, "steepness", 4.0)?;
        let energy = params::scalar_f32_or(grp, "energy", -1.0)?;
        let node = Self::new(args, &donors, &acceptors, r0, steepness, energy)?;
        Ok(BuiltNode::potential(Box::new(node)))
    }
}

impl DerivComputation for HBondCount {
    fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
        // Each donor and acceptor owns a single slot, so gradients are
        // accumulated locally over all partners before depositing.
        let mut donor_grad = vec![Vec3::zeros(); self.donors.len()];
        let mut acceptor_grad = vec![Vec3::zeros(); self.acceptors.len()];
        let mut count = 0.0;

        for (di, d) in self.donors.iter().enumerate() {
            let xd = args.output(0).load_vec3(d.index as usize);
            for (ai, a) in self.acceptors.iter().enumerate() {
                if d.index == a.index {
                    continue;
                }
                let xa = args.output(0).load_vec3(a.index as usize);
                let disp = xd - xa;
                let r = disp.norm();
                if r < 1e-6 {
                    continue;
                }
                let sigma = 1.0 / (1.0 + (-self.steepness * (self.r0 - r)).exp());
                count += sigma;
                // dU/dr = -energy * steepness * sigma (1 - sigma)
                let du_dr = -self.energy * self.steepness * sigma * (1.0 - sigma);
                let g = disp * (du_dr / r);
                donor_grad[di] += g;
                acceptor_grad[ai] -= g;
            }
        }

        self.n_hbond = count;
        for (d, g) in self.donors.iter().zip(&donor_grad) {
            args.machine(0).deposit(d.slot, g.as_slice());
        }
        for (a, g) in self.acceptors.iter().zip(&acceptor_grad) {
            args.machine(0).deposit(a.slot, g.as_slice());
        }
        if mode == ComputeMode::PotentialAndDeriv {
            if let NodeOutput::Potential(v) = out {
                *v = self.energy * count;
            }
        }
    }

    fn get_value_by_name(&self, name: &str) -> Result<Vec<f32>> {
        match name {
            "n_hbond" => Ok(vec![self.n_hbond]),
            other => Err(EngineError::Query(other.to_string())),
        }
    }

    fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
        if arg == 0 {
            self.donors
                .iter()
                .chain(&self.acceptors)
                .map(|&p| vec![p])
                .collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use moldyn_engine::DerivEngine;

    fn hbond_engine(separation: f32) -> DerivEngine {
        let mut engine = DerivEngine::new(2);
        engine.pos_mut().output.store_vec3(0, Vec3::zeros());
        engine
            .pos_mut()
            .output
            .store_vec3(1, Vec3::new(separation, 0.0, 0.0));
        engine
            .add_node("hbond_count", &["pos"], |args| {
                let node = HBondCount::new(args, &[0], &[1], 2.0, 4.0, -1.0)?;
                Ok(BuiltNode::potential(Box::new(node)))
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_contact_counts_close_pairs() {
        let mut engine = hbond_engine(1.0);
        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let n = engine.node_value("hbond_count", "n_hbond").unwrap()[0];
        assert!(n > 0.9, "close pair should count as a bond, n = {n}");
        // One bond at energy -1 gives U near -1.
        assert!(engine.potential < -0.9);
    }

    #[test]
    fn test_distant_pair_does_not_count() {
        let mut engine = hbond_engine(5.0);
        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let n = engine.node_value("hbond_count", "n_hbond").unwrap()[0];
        assert!(n < 1e-3, "distant pair must not count, n = {n}");
    }

    #[test]
    fn test_count_decreases_with_distance() {
        let mut near = hbond_engine(1.8);
        let mut far = hbond_engine(2.2);
        near.compute(ComputeMode::PotentialAndDeriv).unwrap();
        far.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let n_near = near.node_value("hbond_count", "n_hbond").unwrap()[0];
        let n_far = far.node_value("hbond_count", "n_hbond").unwrap()[0];
        assert!(n_near > n_far);
        // At the midpoint the switching function is exactly half a bond.
        let mut mid = hbond_engine(2.0);
        mid.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let n_mid = mid.node_value("hbond_count", "n_hbond").unwrap()[0];
        assert_relative_eq!(n_mid, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_unknown_value_name_is_query_error() {
        let mut engine = hbond_engine(1.0);
        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let err = engine
            .node_value("hbond_count", "n_helix")
            .unwrap_err();
        assert!(matches!(err, EngineError::Query(_)));
    }

    #[test]
    fn test_attractive_gradient_inside_cutoff() {
        // With negative bond energy the potential decreases as the pair
        // approaches, so dU/dx of the donor points away from the acceptor.
        let mut engine = hbond_engine(2.0);
        engine.compute(ComputeMode::PotentialAndDeriv).unwrap();
        let g = engine.pos().sens.load_vec3(0);
        assert!(g.x < 0.0, "donor gradient should point to -x, got {g:?}");
    }
}
