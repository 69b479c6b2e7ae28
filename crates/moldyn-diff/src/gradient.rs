//! Central-difference Jacobians compared against slot-machine deposits.

use moldyn_engine::{ComputeMode, CoordState, DerivEngine, EngineError, NodeOutput, Result};
use moldyn_math::{wrap_angle, Quat, Vec3};

/// How the checked values behave under perturbation.
///
/// `Angular` outputs have their finite differences unwrapped into
/// (-pi, pi]. `Body` inputs are 7-wide quaternion+CoM elements,
/// differentiated over 6 body coordinates with the rotational part
/// converted back to quaternion derivatives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Cartesian,
    Angular,
    Body,
}

/// Relative RMS deviation `sqrt(sum (a-b)^2 / sum a^2)` of `actual` from
/// `reference`, accumulated in f64.
pub fn relative_rms_deviation(reference: &[f32], actual: &[f32]) -> Result<f64> {
    if reference.len() != actual.len() {
        return Err(EngineError::Shape(format!(
            "deviation of vectors with different sizes {} and {}",
            reference.len(),
            actual.len()
        )));
    }
    let mut diff_mag2 = 0.0f64;
    let mut ref_mag2 = 0.0f64;
    for (&r, &a) in reference.iter().zip(actual) {
        diff_mag2 += f64::from(r - a) * f64::from(r - a);
        ref_mag2 += f64::from(r) * f64::from(r);
    }
    if ref_mag2 == 0.0 {
        return Ok(if diff_mag2 == 0.0 { 0.0 } else { f64::INFINITY });
    }
    Ok((diff_mag2 / ref_mag2).sqrt())
}

fn coord_of<'a>(engine: &'a DerivEngine, idx: usize, what: &str) -> Result<&'a CoordState> {
    engine
        .coord_state(idx)
        .ok_or_else(|| EngineError::Shape(format!("{what} is not a coordinate node")))
}

fn coord_of_mut<'a>(
    engine: &'a mut DerivEngine,
    idx: usize,
    what: &str,
) -> Result<&'a mut CoordState> {
    engine
        .coord_state_mut(idx)
        .ok_or_else(|| EngineError::Shape(format!("{what} is not a coordinate node")))
}

/// Flatten a node's current output, row `elem * width + dim`.
fn read_output(engine: &DerivEngine, node_idx: usize) -> Vec<f32> {
    match &engine.nodes()[node_idx].output {
        NodeOutput::Potential(v) => vec![*v],
        NodeOutput::Coord(cs) => {
            let mut out = Vec::with_capacity(cs.n_elem * cs.elem_width);
            for e in 0..cs.n_elem {
                for r in 0..cs.elem_width {
                    out.push(cs.output[(r, e)]);
                }
            }
            out
        }
    }
}

fn central(plus: &[f32], minus: &[f32], eps: f32, angular: bool) -> Vec<f32> {
    plus.iter()
        .zip(minus)
        .map(|(&p, &m)| {
            let diff = if angular { wrap_angle(p - m) } else { p - m };
            diff / (2.0 * eps)
        })
        .collect()
}

/// One finite-difference column: perturb coordinate `(dim, elem)` of the
/// input by +-eps and re-run only the checked node's forward pass.
fn fd_scalar_column(
    engine: &mut DerivEngine,
    node_idx: usize,
    input_idx: usize,
    elem: usize,
    dim: usize,
    eps: f32,
    angular: bool,
) -> Result<Vec<f32>> {
    let orig = coord_of(engine, input_idx, "input")?.output[(dim, elem)];

    coord_of_mut(engine, input_idx, "input")?.output[(dim, elem)] = orig + eps;
    engine.forward_node(node_idx, ComputeMode::PotentialAndDeriv);
    let plus = read_output(engine, node_idx);

    coord_of_mut(engine, input_idx, "input")?.output[(dim, elem)] = orig - eps;
    engine.forward_node(node_idx, ComputeMode::PotentialAndDeriv);
    let minus = read_output(engine, node_idx);

    coord_of_mut(engine, input_idx, "input")?.output[(dim, elem)] = orig;
    Ok(central(&plus, &minus, eps, angular))
}

fn eval_with_quat(
    engine: &mut DerivEngine,
    node_idx: usize,
    input_idx: usize,
    elem: usize,
    q: &Quat,
) -> Result<Vec<f32>> {
    let cs = coord_of_mut(engine, input_idx, "input")?;
    cs.output[(0, elem)] = q.w;
    cs.output[(1, elem)] = q.v.x;
    cs.output[(2, elem)] = q.v.y;
    cs.output[(3, elem)] = q.v.z;
    engine.forward_node(node_idx, ComputeMode::PotentialAndDeriv);
    Ok(read_output(engine, node_idx))
}

/// Finite differences for one 7-wide rigid-body element: three rotations
/// about the lab axes converted to quaternion derivatives, then three CoM
/// translations.
fn fd_body_columns(
    engine: &mut DerivEngine,
    node_idx: usize,
    input_idx: usize,
    elem: usize,
    eps: f32,
) -> Result<Vec<Vec<f32>>> {
    let q0 = {
        let out = &coord_of(engine, input_idx, "input")?.output;
        Quat::new(
            out[(0, elem)],
            out[(1, elem)],
            out[(2, elem)],
            out[(3, elem)],
        )
    };

    let axes = [Vec3::x(), Vec3::y(), Vec3::z()];
    let mut torque_cols = Vec::with_capacity(3);
    for axis in &axes {
        let plus = eval_with_quat(
            engine,
            node_idx,
            input_idx,
            elem,
            &Quat::from_axis_angle(axis, eps).mul(&q0),
        )?;
        let minus = eval_with_quat(
            engine,
            node_idx,
            input_idx,
            elem,
            &Quat::from_axis_angle(axis, -eps).mul(&q0),
        )?;
        torque_cols.push(central(&plus, &minus, eps, false));
    }
    // Restore the unperturbed orientation.
    eval_with_quat(engine, node_idx, input_idx, elem, &q0)?;

    let n_rows = torque_cols[0].len();
    let mut cols = vec![vec![0.0f32; n_rows]; 4];
    for row in 0..n_rows {
        let tau = Vec3::new(
            torque_cols[0][row],
            torque_cols[1][row],
            torque_cols[2][row],
        );
        let dq = q0.torque_deriv(&tau);
        for j in 0..4 {
            cols[j][row] = dq[j];
        }
    }
    for dim in 4..7 {
        cols.push(fd_scalar_column(
            engine, node_idx, input_idx, elem, dim, eps, false,
        )?);
    }
    Ok(cols)
}

/// Compare the analytical Jacobian of `node` with respect to `input`
/// against central differences, returning the relative RMS deviation
/// normalized by the finite-difference vector.
///
/// The engine is evaluated once to populate caches; afterwards its
/// derivative state is left seeded for the extraction and should not be
/// reused without another `compute`.
pub fn gradient_deviation(
    engine: &mut DerivEngine,
    node: &str,
    input: &str,
    eps: f32,
    value_type: ValueType,
) -> Result<f64> {
    let node_idx = engine.require_idx(node)?;
    let input_idx = engine.require_idx(input)?;
    let arg = engine.nodes()[node_idx]
        .parents
        .iter()
        .position(|&p| p == input_idx)
        .ok_or_else(|| {
            EngineError::Configuration(format!(
                "node '{node}' does not take '{input}' as an argument"
            ))
        })?;

    engine.compute(ComputeMode::PotentialAndDeriv)?;

    let pairs = engine.nodes()[node_idx].computation.coord_pairs(arg);
    if pairs.is_empty() {
        return Err(EngineError::Configuration(format!(
            "node '{node}' does not enumerate its coordinate pairs"
        )));
    }
    let in_width = coord_of(engine, input_idx, "input")?.elem_width;
    if value_type == ValueType::Body && in_width != 7 {
        return Err(EngineError::Shape(format!(
            "body-valued input must have element width 7, got {in_width}"
        )));
    }

    // Distinct input elements, in first-appearance order.
    let mut elems: Vec<u32> = Vec::new();
    for plist in &pairs {
        for p in plist {
            if !elems.contains(&p.index) {
                elems.push(p.index);
            }
        }
    }

    let is_potential = engine.nodes()[node_idx].output.is_potential();
    let (n_rows, out_width) = match &engine.nodes()[node_idx].output {
        NodeOutput::Potential(_) => (1, 1),
        NodeOutput::Coord(cs) => (cs.n_elem * cs.elem_width, cs.elem_width),
    };
    let n_cols = elems.len() * in_width;

    // Finite differences over every registered input element.
    let mut fd = vec![0.0f32; n_rows * n_cols];
    for (epos, &elem) in elems.iter().enumerate() {
        let columns: Vec<Vec<f32>> = match value_type {
            ValueType::Body => fd_body_columns(engine, node_idx, input_idx, elem as usize, eps)?,
            _ => {
                let angular = value_type == ValueType::Angular;
                let mut cols = Vec::with_capacity(in_width);
                for dim in 0..in_width {
                    cols.push(fd_scalar_column(
                        engine,
                        node_idx,
                        input_idx,
                        elem as usize,
                        dim,
                        eps,
                        angular,
                    )?);
                }
                cols
            }
        };
        for (dim, col) in columns.iter().enumerate() {
            for (row, &v) in col.iter().enumerate() {
                fd[row * n_cols + epos * in_width + dim] = v;
            }
        }
    }

    // Analytical Jacobian: reset deposits, seed unit sensitivity, run only
    // the checked node's deposit pass, then read its slots.
    engine.reset_derivatives();
    if is_potential {
        engine.forward_node(node_idx, ComputeMode::PotentialAndDeriv);
    } else {
        coord_of_mut(engine, node_idx, "node")?.sens.fill(1.0);
        engine.forward_node(node_idx, ComputeMode::PotentialAndDeriv);
        engine.propagate_node(node_idx);
    }

    let mut analytic = vec![0.0f32; n_rows * n_cols];
    {
        let machine = &coord_of(engine, input_idx, "input")?.machine;
        for (e_out, plist) in pairs.iter().enumerate() {
            for p in plist {
                let Some(epos) = elems.iter().position(|&x| x == p.index) else {
                    continue;
                };
                for r in 0..out_width {
                    let col = machine.slot(p.slot + r as u32);
                    let row = if is_potential { 0 } else { e_out * out_width + r };
                    for (dim, &v) in col.iter().enumerate() {
                        analytic[row * n_cols + epos * in_width + dim] += v;
                    }
                }
            }
        }
    }

    relative_rms_deviation(&fd, &analytic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_of_identical_vectors_is_zero() {
        let a = [1.0, -2.0, 3.0];
        assert_eq!(relative_rms_deviation(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_deviation_size_mismatch() {
        let err = relative_rms_deviation(&[1.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, EngineError::Shape(_)));
    }

    #[test]
    fn test_deviation_known_value() {
        // |a - b| = 3 against |a| = 5.
        let reference = [3.0, 4.0];
        let actual = [3.0, 7.0];
        let dev = relative_rms_deviation(&reference, &actual).unwrap();
        assert!((dev - 0.6).abs() < 1e-12);
    }
}
