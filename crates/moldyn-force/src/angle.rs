//! Planar-angle coordinate node.

use moldyn_engine::{
    check_elem_width, params, ArgList, AutoDiffParams, BuiltNode, ComputeMode, CoordPair,
    DerivComputation, NodeOutput, Result,
};
use moldyn_math::Vec3;
use serde_json::Value;

struct AngleTerm {
    atoms: [CoordPair; 3],
    autodiff: AutoDiffParams,
}

/// Width-1 coordinate node producing the interior angle at the middle atom
/// of each (i, j, k) triple, in [0, pi]. The angle is computed via atan2 so
/// values stay well behaved toward the collinear limit.
pub struct AngleCoord {
    terms: Vec<AngleTerm>,
    /// d(theta)/dx for the three atoms of each term, cached by `forward`.
    jacobian: Vec<[Vec3; 3]>,
}

impl AngleCoord {
    pub fn new(args: &mut ArgList<'_>, id: &[[usize; 3]]) -> Result<Self> {
        check_elem_width(args, 0, 3)?;
        let mut terms = Vec::with_capacity(id.len());
        for triple in id {
            let mut atoms = [
                CoordPair::new(triple[0] as u32),
                CoordPair::new(triple[1] as u32),
                CoordPair::new(triple[2] as u32),
            ];
            for a in &mut atoms {
                // This node is width 1, so each dependency claims one slot.
                args.add_request(0, 1, a)?;
            }
            terms.push(AngleTerm {
                atoms,
                autodiff: AutoDiffParams::from_pairs(&atoms),
            });
        }
        let jacobian = vec![[Vec3::zeros(); 3]; id.len()];
        Ok(Self { terms, jacobian })
    }

    pub fn from_group(grp: &Value, args: &mut ArgList<'_>) -> Result<BuiltNode> {
        let id = params::index_tuples::<3>(grp, "id")?;
        let n_elem = id.len();
        let node = Self::new(args, &id)?;
        Ok(BuiltNode::coord(Box::new(node), n_elem, 1))
    }
}

impl DerivComputation for AngleCoord {
    fn forward(&mut self, _mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
        let Some(cs) = out.coord_mut() else { return };
        for (t, term) in self.terms.iter().enumerate() {
            let xi = args.output(0).load_vec3(term.atoms[0].index as usize);
            let xj = args.output(0).load_vec3(term.atoms[1].index as usize);
            let xk = args.output(0).load_vec3(term.atoms[2].index as usize);
            let u = xi - xj;
            let v = xk - xj;

            let n = u.cross(&v);
            let w = n.norm();
            let c = u.dot(&v);
            cs.output[(0, t)] = w.atan2(c);

            // theta = atan2(|u x v|, u . v); differentiate both arguments.
            // Near collinear the plane normal is ill-conditioned, so fall
            // back to any direction perpendicular to u.
            let n_hat = if w > 1e-7 {
                n / w
            } else {
                let axis = if u.x.abs() < 0.9 * u.norm() {
                    Vec3::x()
                } else {
                    Vec3::y()
                };
                let fallback = u.cross(&axis);
                fallback / fallback.norm().max(1e-12)
            };
            let denom = w * w + c * c;
            let d_u = (v.cross(&n_hat) * c - v * w) / denom;
            let d_v = (n_hat.cross(&u) * c - u * w) / denom;
            self.jacobian[t] = [d_u, -(d_u + d_v), d_v];
        }
    }

    fn reverse(&mut self, own: &NodeOutput, args: &mut ArgList<'_>) {
        let Some(cs) = own.coord() else { return };
        for (t, term) in self.terms.iter().enumerate() {
            let s = cs.sens[(0, t)];
            for (&slot, grad) in term.autodiff.slots1().iter().zip(&self.jacobian[t]) {
                args.machine(0).deposit(slot as u32, (grad * s).as_slice());
            }
        }
    }

    fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
        if arg == 0 {
            self.terms.iter().map(|t| t.atoms.to_vec()).collect()
        } else {
            Vec::new()
        }
    }
}
