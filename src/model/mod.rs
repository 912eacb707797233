//! The trained model: two dense factor matrices P and Q.
//!
//! During training the column width is the SIMD-aligned `k`; [`Model::shrink`]
//! compacts rows back to the real factor count before the model is handed to
//! the caller. `P[u] . Q[v]` approximates the rating at `(u, v)`.

mod io;

pub use io::{load_model, save_model};

use crate::data::{aligned_dim, AlignedBuffer};
use crate::error::Result;
use crate::rng::FactorRng;

/// Dense user and item factors.
#[derive(Debug, Clone)]
pub struct Model {
    m: u32,
    n: u32,
    /// Current column width of both matrices. Aligned during training,
    /// `k_real` after [`Model::shrink`].
    k: usize,
    p: AlignedBuffer,
    q: AlignedBuffer,
}

impl Model {
    /// Allocate and randomly initialize a model for training.
    ///
    /// Entries are uniform on `[0, sqrt(1/k_real))`; the aligned padding
    /// columns stay zero so they never contribute to a dot product.
    pub fn init(m: u32, n: u32, k_real: usize, rng: &mut FactorRng) -> Result<Self> {
        let k = aligned_dim(k_real);
        let mut p = AlignedBuffer::zeroed(m as usize * k)?;
        let mut q = AlignedBuffer::zeroed(n as usize * k)?;

        let scale = (1.0 / k_real as f32).sqrt();
        let mut fill = |buf: &mut AlignedBuffer, rows: u32| {
            for row in 0..rows as usize {
                for x in &mut buf.as_mut_slice()[row * k..row * k + k_real] {
                    *x = rng.next_f32() * scale;
                }
            }
        };
        fill(&mut p, m);
        fill(&mut q, n);

        Ok(Self { m, n, k, p, q })
    }

    /// Assemble a model from parts (used by the loader).
    pub(crate) fn from_parts(m: u32, n: u32, k: usize, p: AlignedBuffer, q: AlignedBuffer) -> Self {
        debug_assert_eq!(p.len(), m as usize * k);
        debug_assert_eq!(q.len(), n as usize * k);
        Self { m, n, k, p, q }
    }

    /// Number of user rows.
    #[inline]
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Number of item columns.
    #[inline]
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Current factor count per row.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Factor row for user `u`.
    #[inline]
    pub fn p_row(&self, u: u32) -> &[f32] {
        let start = u as usize * self.k;
        &self.p.as_slice()[start..start + self.k]
    }

    /// Factor row for item `v`.
    #[inline]
    pub fn q_row(&self, v: u32) -> &[f32] {
        let start = v as usize * self.k;
        &self.q.as_slice()[start..start + self.k]
    }

    /// Predicted rating `P[u] . Q[v]`, or `0.0` when either index is out of
    /// range. Read-only and safe to call from any number of threads.
    #[inline]
    pub fn predict(&self, u: u32, v: u32) -> f32 {
        if u >= self.m || v >= self.n {
            return 0.0;
        }
        dot(self.p_row(u), self.q_row(v))
    }

    /// Multiply every factor entry by `factor`.
    pub fn scale_factors(&mut self, factor: f32) {
        for x in self.p.as_mut_slice() {
            *x *= factor;
        }
        for x in self.q.as_mut_slice() {
            *x *= factor;
        }
    }

    /// Compact rows from the aligned width down to `k_new` columns.
    ///
    /// Rows are moved in place; the buffer keeps its allocation and the tail
    /// beyond `rows * k_new` becomes garbage that is never read again.
    pub fn shrink(&mut self, k_new: usize) {
        assert!(k_new <= self.k, "cannot grow a model");
        if k_new == self.k {
            return;
        }
        let k_old = self.k;
        let compact = |buf: &mut AlignedBuffer, rows: u32| {
            let s = buf.as_mut_slice();
            for row in 0..rows as usize {
                s.copy_within(row * k_old..row * k_old + k_new, row * k_new);
            }
        };
        compact(&mut self.p, self.m);
        compact(&mut self.q, self.n);
        self.k = k_new;
    }

    /// Reorder P rows by `p_map` and Q rows by `q_map`, in place.
    ///
    /// Row `i` moves to index `map[i]`. The trainer passes the inverse
    /// permutations at teardown, which lands every trained row back at its
    /// caller-visible index.
    pub fn permute_rows(&mut self, p_map: &[u32], q_map: &[u32]) {
        cycle_walk(self.p.as_mut_slice(), &mut p_map.to_vec(), self.k);
        cycle_walk(self.q.as_mut_slice(), &mut q_map.to_vec(), self.k);
    }

    /// Raw factor storage, for the training workers.
    pub(crate) fn factors_mut(&mut self) -> (&mut AlignedBuffer, &mut AlignedBuffer) {
        (&mut self.p, &mut self.q)
    }
}

/// Dot product over one factor row pair.
#[inline]
pub(crate) fn dot(p: &[f32], q: &[f32]) -> f32 {
    p.iter().zip(q).map(|(a, b)| a * b).sum()
}

/// Swap rows along permutation cycles until `map` is the identity.
fn cycle_walk(vec: &mut [f32], map: &mut [u32], k: usize) {
    let mut pivot = 0;
    while pivot < map.len() {
        if map[pivot] as usize == pivot {
            pivot += 1;
            continue;
        }
        let next = map[pivot] as usize;
        for d in 0..k {
            vec.swap(pivot * k + d, next * k + d);
        }
        map[pivot] = map[next];
        map[next] = next as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LANES;
    use approx::assert_relative_eq;

    #[test]
    fn test_init_shape_and_padding() {
        let mut rng = FactorRng::seed_from_u64(1);
        let model = Model::init(4, 3, 5, &mut rng).unwrap();
        assert_eq!(model.k(), LANES);
        let scale = (1.0f32 / 5.0).sqrt();
        for u in 0..4 {
            let row = model.p_row(u);
            for &x in &row[..5] {
                assert!((0.0..scale).contains(&x));
            }
            for &x in &row[5..] {
                assert_eq!(x, 0.0);
            }
        }
    }

    #[test]
    fn test_predict_out_of_range_is_zero() {
        let mut rng = FactorRng::seed_from_u64(2);
        let model = Model::init(3, 3, 4, &mut rng).unwrap();
        assert_eq!(model.predict(3, 0), 0.0);
        assert_eq!(model.predict(0, 3), 0.0);
        assert_ne!(model.predict(0, 0), 0.0);
    }

    #[test]
    fn test_predict_idempotent() {
        let mut rng = FactorRng::seed_from_u64(3);
        let model = Model::init(5, 5, 4, &mut rng).unwrap();
        let a = model.predict(2, 2);
        let b = model.predict(2, 2);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_shrink_keeps_leading_columns() {
        let mut rng = FactorRng::seed_from_u64(4);
        let mut model = Model::init(3, 2, 4, &mut rng).unwrap();
        let kept: Vec<Vec<f32>> = (0..3).map(|u| model.p_row(u)[..4].to_vec()).collect();
        model.shrink(4);
        assert_eq!(model.k(), 4);
        for (u, want) in kept.iter().enumerate() {
            assert_eq!(model.p_row(u as u32), &want[..]);
        }
    }

    #[test]
    fn test_scale_factors_scales_predictions() {
        let mut rng = FactorRng::seed_from_u64(5);
        let mut model = Model::init(3, 3, 4, &mut rng).unwrap();
        let before = model.predict(1, 1);
        model.scale_factors(2.0);
        assert_relative_eq!(model.predict(1, 1), 4.0 * before, epsilon = 1e-5);
    }

    #[test]
    fn test_permute_rows_moves_row_to_mapped_index() {
        let mut rng = FactorRng::seed_from_u64(6);
        let mut model = Model::init(4, 4, 4, &mut rng).unwrap();
        let rows: Vec<Vec<f32>> = (0..4).map(|u| model.p_row(u).to_vec()).collect();

        let map = vec![2u32, 0, 3, 1];
        model.permute_rows(&map, &[0, 1, 2, 3]);
        for (i, want) in rows.iter().enumerate() {
            assert_eq!(model.p_row(map[i]), &want[..]);
        }
    }

    #[test]
    fn test_permute_rows_round_trip() {
        let mut rng = FactorRng::seed_from_u64(7);
        let mut model = Model::init(4, 4, 4, &mut rng).unwrap();
        let rows: Vec<Vec<f32>> = (0..4).map(|u| model.p_row(u).to_vec()).collect();

        // Applying a map then its inverse restores the original order.
        let map = vec![2u32, 0, 3, 1];
        let inv = crate::rng::invert_permutation(&map);
        model.permute_rows(&map, &[0, 1, 2, 3]);
        model.permute_rows(&inv, &[0, 1, 2, 3]);
        for (u, want) in rows.iter().enumerate() {
            assert_eq!(model.p_row(u as u32), &want[..]);
        }
    }
}
