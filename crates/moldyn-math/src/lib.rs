//! Storage primitives and small math for the moldyn energy engine.
//!
//! Provides the padded 2-D float buffer shared by every compute node
//! (`VecArray`), quaternion utilities for rigid-body derivatives, and the
//! 3-vector aliases used throughout the workspace.

pub mod quaternion;
pub mod vecarray;

pub use quaternion::Quat;
pub use vecarray::VecArray;

/// 3D vector alias.
pub type Vec3 = nalgebra::Vector3<f32>;
/// 3x3 matrix alias.
pub type Mat3 = nalgebra::Matrix3<f32>;

/// Element counts are padded to a multiple of this so per-element loops can
/// be vectorized without a scalar tail.
pub const VEC_WIDTH: usize = 4;

/// Round `n` up to the next multiple of `k`.
#[inline]
pub fn round_up(n: usize, k: usize) -> usize {
    n.div_ceil(k) * k
}

/// Wrap an angle into (-pi, pi].
#[inline]
pub fn wrap_angle(x: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut y = x % TAU;
    if y <= -PI {
        y += TAU;
    } else if y > PI {
        y -= TAU;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(4, 4), 4);
        assert_eq!(round_up(9, 4), 12);
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(0.0), 0.0);
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-6);
        assert_relative_eq!(wrap_angle(-3.0 * PI), PI, epsilon = 1e-6);
        assert_relative_eq!(wrap_angle(PI + 0.1), -PI + 0.1, epsilon = 1e-6);
        // pi maps to itself, -pi wraps to the open side
        assert_relative_eq!(wrap_angle(PI), PI, epsilon = 1e-6);
    }
}
