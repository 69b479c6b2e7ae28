//! Symplectic integration over the engine's position node.
//!
//! Both integrators are expressed as a three-stage kick/drift loop over the
//! `integration_stage` primitive:
//!
//!   drift(a dt) . kick(b dt) . drift((1-2a) dt) . kick(b dt) . drift(a dt)
//!
//! with b = 1/2. Verlet is a = 0, which degenerates to kick-drift-kick
//! velocity Verlet; the Predescu variant uses the optimized two-stage
//! coefficient below. The engine recomputes derivatives before each kick.

use crate::engine::DerivEngine;
use crate::error::Result;
use crate::node::{ComputeMode, CoordState};
use moldyn_math::{Vec3, VecArray};

/// Outer-stage coefficient of the optimized two-stage splitting.
pub const PREDESCU_A: f32 = 0.193_183_33;

const STAGE_B: f32 = 0.5;

/// Which splitting `integration_cycle` uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegratorType {
    Verlet,
    Predescu,
}

/// One kick/drift update of momentum and position.
///
/// Each atom's derivative 3-vector is clipped to magnitude `max_force` by
/// rescaling, then `mom -= vel_factor * f` and `pos += pos_factor * mom`.
pub fn integration_stage(
    mom: &mut VecArray,
    pos: &mut VecArray,
    deriv: &VecArray,
    vel_factor: f32,
    pos_factor: f32,
    max_force: f32,
    n_atom: usize,
) {
    for na in 0..n_atom {
        let mut f = deriv.load_vec3(na);
        let magnitude = f.norm();
        if magnitude > max_force {
            f *= max_force / magnitude;
        }
        for d in 0..3 {
            mom[(d, na)] -= vel_factor * f[d];
            pos[(d, na)] += pos_factor * mom[(d, na)];
        }
    }
}

/// Subtract the centroid from all positions; with `xy_only` the z
/// coordinate is left untouched (useful for membrane systems).
pub fn recenter(pos: &mut VecArray, xy_only: bool, n_atom: usize) {
    if n_atom == 0 {
        return;
    }
    let mut center = Vec3::zeros();
    for na in 0..n_atom {
        center += pos.load_vec3(na);
    }
    center /= n_atom as f32;
    if xy_only {
        center.z = 0.0;
    }
    for na in 0..n_atom {
        for d in 0..3 {
            pos[(d, na)] -= center[d];
        }
    }
}

impl DerivEngine {
    /// Advance momenta and positions by one full step of `dt`. `mom` must
    /// be a `(3, n_atom)` buffer; forces are read from the position node's
    /// sensitivity after each derivative evaluation.
    pub fn integration_cycle(
        &mut self,
        mom: &mut VecArray,
        dt: f32,
        max_force: f32,
        integrator: IntegratorType,
    ) -> Result<()> {
        let a = match integrator {
            IntegratorType::Verlet => 0.0,
            IntegratorType::Predescu => PREDESCU_A,
        };
        let stages = [(0.0, a), (STAGE_B, 1.0 - 2.0 * a), (STAGE_B, a)];

        let n_atom = self.n_atom();
        for (kick, drift) in stages {
            if kick == 0.0 && drift == 0.0 {
                continue;
            }
            if kick != 0.0 {
                self.compute(ComputeMode::DerivOnly)?;
            }
            let CoordState { output, sens, .. } = self.pos_mut();
            integration_stage(mom, output, sens, kick * dt, drift * dt, max_force, n_atom);
        }
        Ok(())
    }
}
