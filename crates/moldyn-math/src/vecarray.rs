//! Padded 2-D float storage shared by all compute nodes.
//!
//! A `VecArray` holds `n_dim` rows of `n_elem` values, indexed `(dim, elem)`.
//! Rows are contiguous and the element extent is padded to a multiple of 4,
//! so only the first `n_elem` columns carry meaning. There is no resizing
//! after construction.

use crate::{round_up, Vec3, VEC_WIDTH};
use std::ops::{Index, IndexMut};

/// Two-dimensional contiguous `f32` buffer with `(dim, elem)` indexing.
#[derive(Clone, Debug)]
pub struct VecArray {
    n_dim: usize,
    n_elem: usize,
    n_elem_padded: usize,
    data: Vec<f32>,
}

impl VecArray {
    /// Allocate a zeroed buffer of shape `(n_dim, n_elem)`.
    pub fn new(n_dim: usize, n_elem: usize) -> Self {
        let n_elem_padded = round_up(n_elem, VEC_WIDTH);
        Self {
            n_dim,
            n_elem,
            n_elem_padded,
            data: vec![0.0; n_dim * n_elem_padded],
        }
    }

    /// Number of rows (the element width).
    #[inline]
    pub fn n_dim(&self) -> usize {
        self.n_dim
    }

    /// Number of meaningful columns.
    #[inline]
    pub fn n_elem(&self) -> usize {
        self.n_elem
    }

    /// Allocated column count, a multiple of 4.
    #[inline]
    pub fn n_elem_padded(&self) -> usize {
        self.n_elem_padded
    }

    /// Set every entry (padding included) to `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// One contiguous row.
    #[inline]
    pub fn row(&self, d: usize) -> &[f32] {
        &self.data[d * self.n_elem_padded..(d + 1) * self.n_elem_padded]
    }

    /// Load the first three rows of column `e` as a vector.
    #[inline]
    pub fn load_vec3(&self, e: usize) -> Vec3 {
        Vec3::new(self[(0, e)], self[(1, e)], self[(2, e)])
    }

    /// Store a vector into the first three rows of column `e`.
    #[inline]
    pub fn store_vec3(&mut self, e: usize, v: Vec3) {
        self[(0, e)] = v.x;
        self[(1, e)] = v.y;
        self[(2, e)] = v.z;
    }

    /// Add a vector onto the first three rows of column `e`.
    #[inline]
    pub fn accum_vec3(&mut self, e: usize, v: Vec3) {
        self[(0, e)] += v.x;
        self[(1, e)] += v.y;
        self[(2, e)] += v.z;
    }

    /// Copy the meaningful columns into a flat buffer laid out
    /// `buffer[e * n_dim + d]`. `buffer` must hold `n_elem * n_dim` floats.
    pub fn copy_to_buffer(&self, buffer: &mut [f32]) {
        for e in 0..self.n_elem {
            for d in 0..self.n_dim {
                buffer[e * self.n_dim + d] = self[(d, e)];
            }
        }
    }

    /// True if every meaningful entry is finite.
    pub fn is_finite(&self) -> bool {
        (0..self.n_dim).all(|d| self.row(d)[..self.n_elem].iter().all(|v| v.is_finite()))
    }
}

impl Index<(usize, usize)> for VecArray {
    type Output = f32;

    #[inline]
    fn index(&self, (d, e): (usize, usize)) -> &f32 {
        &self.data[d * self.n_elem_padded + e]
    }
}

impl IndexMut<(usize, usize)> for VecArray {
    #[inline]
    fn index_mut(&mut self, (d, e): (usize, usize)) -> &mut f32 {
        &mut self.data[d * self.n_elem_padded + e]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        let a = VecArray::new(3, 10);
        assert_eq!(a.n_dim(), 3);
        assert_eq!(a.n_elem(), 10);
        assert_eq!(a.n_elem_padded(), 12);
        assert_eq!(a.row(0).len(), 12);
    }

    #[test]
    fn test_index_roundtrip() {
        let mut a = VecArray::new(2, 5);
        a[(0, 3)] = 1.5;
        a[(1, 4)] = -2.0;
        assert_eq!(a[(0, 3)], 1.5);
        assert_eq!(a[(1, 4)], -2.0);
        assert_eq!(a[(0, 4)], 0.0);
    }

    #[test]
    fn test_vec3_access() {
        let mut a = VecArray::new(3, 2);
        a.store_vec3(1, Vec3::new(1.0, 2.0, 3.0));
        a.accum_vec3(1, Vec3::new(0.5, 0.5, 0.5));
        let v = a.load_vec3(1);
        assert_eq!(v, Vec3::new(1.5, 2.5, 3.5));
    }

    #[test]
    fn test_copy_to_buffer() {
        let mut a = VecArray::new(2, 3);
        for e in 0..3 {
            a[(0, e)] = e as f32;
            a[(1, e)] = 10.0 + e as f32;
        }
        let mut flat = vec![0.0; 6];
        a.copy_to_buffer(&mut flat);
        assert_eq!(flat, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
    }

    #[test]
    fn test_is_finite() {
        let mut a = VecArray::new(1, 2);
        assert!(a.is_finite());
        a[(0, 1)] = f32::NAN;
        assert!(!a.is_finite());
    }
}
