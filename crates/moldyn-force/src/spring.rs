//! Harmonic spring potentials over distances, angles, and dihedrals.

use moldyn_engine::{
    check_elem_width, params, ArgList, BuiltNode, ComputeMode, CoordPair, DerivComputation,
    EngineError, NodeOutput, Result,
};
use moldyn_math::{wrap_angle, Vec3};
use serde_json::Value;

fn check_term_counts(name: &str, n_id: usize, lens: &[usize]) -> Result<()> {
    if lens.iter().any(|&l| l != n_id) {
        return Err(EngineError::Shape(format!(
            "{name}: parameter arrays must all have {n_id} entries"
        )));
    }
    Ok(())
}

struct DistSpringTerm {
    atoms: [CoordPair; 2],
    equil_dist: f32,
    spring_const: f32,
}

/// Harmonic bond: U = sum 0.5 k (r - r0)^2 over atom pairs.
pub struct DistSpring {
    terms: Vec<DistSpringTerm>,
    cached_dr: Vec<f32>,
}

impl DistSpring {
    pub fn new(
        args: &mut ArgList<'_>,
        id: &[[usize; 2]],
        equil_dist: &[f32],
        spring_const: &[f32],
    ) -> Result<Self> {
        check_elem_width(args, 0, 3)?;
        check_term_counts("dist_spring", id.len(), &[equil_dist.len(), spring_const.len()])?;
        let mut terms = Vec::with_capacity(id.len());
        for (t, pair) in id.iter().enumerate() {
            let mut atoms = [CoordPair::new(pair[0] as u32), CoordPair::new(pair[1] as u32)];
            for a in &mut atoms {
                args.add_request(0, 1, a)?;
            }
            terms.push(DistSpringTerm {
                atoms,
                equil_dist: equil_dist[t],
                spring_const: spring_const[t],
            });
        }
        let cached_dr = vec![0.0; id.len()];
        Ok(Self { terms, cached_dr })
    }

    pub fn from_group(grp: &Value, args: &mut ArgList<'_>) -> Result<BuiltNode> {
        let id = params::index_tuples::<2>(grp, "id")?;
        let equil = params::array_f32(grp, "equil_dist")?;
        let k = params::array_f32(grp, "spring_const")?;
        let node = Self::new(args, &id, &equil, &k)?;
        Ok(BuiltNode::potential(Box::new(node)))
    }
}

impl DerivComputation for DistSpring {
    fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
        let mut pot = 0.0;
        for (t, term) in self.terms.iter().enumerate() {
            let x0 = args.output(0).load_vec3(term.atoms[0].index as usize);
            let x1 = args.output(0).load_vec3(term.atoms[1].index as usize);
            let disp = x0 - x1;
            let r = disp.norm();
            let dr = r - term.equil_dist;
            self.cached_dr[t] = dr;
            // dU/dx0 = k (r - r0) disp / r
            let g = if r > 1e-6 {
                disp * (term.spring_const * dr / r)
            } else {
                Vec3::zeros()
            };
            pot += 0.5 * term.spring_const * dr * dr;
            args.machine(0).deposit(term.atoms[0].slot, g.as_slice());
            args.machine(0).deposit(term.atoms[1].slot, (-g).as_slice());
        }
        if mode == ComputeMode::PotentialAndDeriv {
            if let NodeOutput::Potential(v) = out {
                *v = pot;
            }
        }
    }

    fn get_param(&self) -> Vec<f32> {
        self.terms
            .iter()
            .flat_map(|t| [t.equil_dist, t.spring_const])
            .collect()
    }

    fn set_param(&mut self, new_params: &[f32]) {
        for (term, chunk) in self.terms.iter_mut().zip(new_params.chunks_exact(2)) {
            term.equil_dist = chunk[0];
            term.spring_const = chunk[1];
        }
    }

    fn get_param_deriv(&self) -> Vec<f32> {
        // dU/dr0 = -k (r - r0); dU/dk = 0.5 (r - r0)^2
        self.terms
            .iter()
            .zip(&self.cached_dr)
            .flat_map(|(t, &dr)| [-t.spring_const * dr, 0.5 * dr * dr])
            .collect()
    }

    fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
        if arg == 0 {
            self.terms.iter().map(|t| t.atoms.to_vec()).collect()
        } else {
            Vec::new()
        }
    }
}

struct AngleSpringTerm {
    angle: CoordPair,
    equil_angle: f32,
    spring_const: f32,
}

/// Harmonic restraint on a width-1 angular coordinate node:
/// U = sum 0.5 k wrap(theta - theta0)^2.
pub struct AngleSpring {
    terms: Vec<AngleSpringTerm>,
}

impl AngleSpring {
    pub fn new(
        args: &mut ArgList<'_>,
        id: &[usize],
        equil_angle: &[f32],
        spring_const: &[f32],
    ) -> Result<Self> {
        check_elem_width(args, 0, 1)?;
        check_term_counts(
            "angle_spring",
            id.len(),
            &[equil_angle.len(), spring_const.len()],
        )?;
        let mut terms = Vec::with_capacity(id.len());
        for (t, &elem) in id.iter().enumerate() {
            let mut angle = CoordPair::new(elem as u32);
            args.add_request(0, 1, &mut angle)?;
            terms.push(AngleSpringTerm {
                angle,
                equil_angle: equil_angle[t],
                spring_const: spring_const[t],
            });
        }
        Ok(Self { terms })
    }

    pub fn from_group(grp: &Value, args: &mut ArgList<'_>) -> Result<BuiltNode> {
        let id = params::array_index(grp, "id")?;
        let equil = params::array_f32(grp, "equil_angle")?;
        let k = params::array_f32(grp, "spring_const")?;
        let node = Self::new(args, &id, &equil, &k)?;
        Ok(BuiltNode::potential(Box::new(node)))
    }
}

impl DerivComputation for AngleSpring {
    fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
        let mut pot = 0.0;
        for term in &self.terms {
            let theta = args.output(0)[(0, term.angle.index as usize)];
            let d = wrap_angle(theta - term.equil_angle);
            pot += 0.5 * term.spring_const * d * d;
            args.machine(0)
                .deposit(term.angle.slot, &[term.spring_const * d]);
        }
        if mode == ComputeMode::PotentialAndDeriv {
            if let NodeOutput::Potential(v) = out {
                *v = pot;
            }
        }
    }

    fn coord_pairs(&self, arg: usize) -> Vec<Vec<CoordPair>> {
        if arg == 0 {
            self.terms.iter().map(|t| vec![t.angle]).collect()
        } else {
            Vec::new()
        }
    }
}

struct DihedralTerm {
    atoms: [CoordPair; 4],
    equil_angle: f32,
    spring_const: f32,
}

/// Periodic harmonic restraint on the torsion of four atoms:
/// U = sum 0.5 k wrap(phi - phi0)^2.
pub struct DihedralSpring {
    terms: Vec<DihedralTerm>,
}

impl DihedralSpring {
    pub fn new(
        args: &mut ArgList<'_>,
        id: &[[usize; 4]],
        equil_angle: &[f32],
        spring_const: &[f32],
    ) -> Result<Self> {
        check_elem_width(args, 0, 3)?;
        check_term_counts(
            "dihedral_spring",
            id.len(),
            &[equil_angle.len(), spring_const.len()],
        )?;
        let mut terms = Vec::with_capacity(id.len());
        for (t, quad) in id.iter().enumerate() {
            let mut atoms = [
                CoordPair::new(quad[0] as u32),
                CoordPair::new(quad[1] as u32),
                CoordPair::new(quad[2] as u32),
                CoordPair::new(quad[3] as u32),
            ];
            for a in &mut atoms {
                args.add_request(0, 1, a)?;
            }
            terms.push(DihedralTerm {
                atoms,
                equil_angle: equil_angle[t],
                spring_const: spring_const[t],
            });
        }
        Ok(Self { terms })
    }

    pub fn from_group(grp: &Value, args: &mut ArgList<'_>) -> Result<BuiltNode> {
        let id = params::index_tuples::<4>(grp, "id")?;
        let equil = params::array_f32(grp, "equil_angle")?;
        let k = params::array_f32(grp, "spring_const")?;
        let node = Self::new(args, &id, &equil, &k)?;
        Ok(BuiltNode::potential(Box::new(node)))
    }
}

impl DerivComputation for DihedralSpring {
    fn forward(&mut self, mode: ComputeMode, args: &mut ArgList<'_>, out: &mut NodeOutput) {
        let mut pot = 0.0;
        let zero = [0.0f32; 3];
        for term in &self.terms {
            let xa = args.output(0).load_vec3(term.atoms[0].index as usize);
            let xb = args.output(0).load_vec3(term.atoms[1].index as usize);
            let xc = args.output(0).load_vec3(term.atoms[2].index as usize);
            let xd = args.output(0).load_vec3(term.atoms[3].index as usize);

            let b1 = xb - xa;
            let b2 = xc - xb;
            let b3 = xd - xc;
            let n1 = b1.cross(&b2);
            let n2 = b2.cross(&b3);
            let n1_sq = n1.norm_squared();
            let n2_sq = n2.norm_squared();
            let b2_sq = b2.norm_squared();
            if n1_sq < 1e-12 || n2_sq < 1e-12 || b2_sq < 1e-12 {
                // Degenerate geometry: no well-defined torsion.
                for a in &term.atoms {
                    args.machine(0).deposit(a.slot, &zero);
                }
                continue;
            }
            let b2_len = b2_sq.sqrt();
            let phi = (n1.cross(&n2).dot(&b2) / b2_len).atan2(n1.dot(&n2));

            // dphi/dx_a and dphi/dx_d, then the inner atoms by
            // translation invariance.
            let p = n1 * (-b2_len / n1_sq);
            let q = n2 * (b2_len / n2_sq);
            let s1 = b1.dot(&b2) / b2_sq;
            let s2 = b3.dot(&b2) / b2_sq;
            let g_b = p * (s1 - 1.0) - q * s2;
            let g_c = q * (s2 - 1.0) - p * s1;

            let d = wrap_angle(phi - term.equil_angle);
            let coeff = term.spring_const * d;
            pot += 0.5 * term.spring_const * d * d;

            args.machine(0).deposit(term.atoms[0].slot, (p * coeff).as_slice());
            args.machine(0).deposit(term.atoms[1].slot, (g_b * coeff).as_slice());
            args.machine(0).deposit(term.atoms[2].slot, (g_c * coeff).as_slice());
            args.machine(0).deposit(term.atoms[3].slot, (q * coeff).as_slice());
        }
        if mode == ComputeMode::PotentialAndDeriv {
            if let NodeOutput::Potential(v) = out {
                *v = pot;
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
