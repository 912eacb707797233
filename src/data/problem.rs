//! Sparse rating data: observed (user, item, rating) triples.

use std::io::BufRead;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// One observed rating sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    /// User (row) index, `0 <= u < m`.
    pub u: u32,
    /// Item (column) index, `0 <= v < n`.
    pub v: u32,
    /// Observed rating value.
    pub r: f32,
}

/// An m x n sparse rating matrix held as a reorderable triple array.
///
/// Duplicate triples are permitted and treated as independent observations.
#[derive(Debug, Clone)]
pub struct Problem {
    m: u32,
    n: u32,
    ratings: Vec<Rating>,
}

impl Problem {
    /// Build a problem from triples, validating index bounds.
    pub fn new(m: u32, n: u32, ratings: Vec<Rating>) -> Result<Self> {
        if ratings.is_empty() {
            return Err(Error::invalid("problem has no ratings"));
        }
        for (i, t) in ratings.iter().enumerate() {
            if t.u >= m || t.v >= n {
                return Err(Error::invalid(format!(
                    "rating {} references ({}, {}) outside {}x{}",
                    i, t.u, t.v, m, n
                )));
            }
            if !t.r.is_finite() {
                return Err(Error::invalid(format!("rating {} is not finite", i)));
            }
        }
        Ok(Self { m, n, ratings })
    }

    /// Read triples from whitespace-separated `u v r` lines.
    ///
    /// Indices are 0-based; the matrix dimensions are inferred as
    /// `max(index) + 1` per side.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut ratings = Vec::new();
        let mut m = 0u32;
        let mut n = 0u32;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let triple = (|| {
                let u: u32 = fields.next()?.parse().ok()?;
                let v: u32 = fields.next()?.parse().ok()?;
                let r: f32 = fields.next()?.parse().ok()?;
                Some(Rating { u, v, r })
            })();
            let t = triple.ok_or_else(|| {
                Error::invalid(format!("line {}: expected `u v r`, got {:?}", lineno + 1, line))
            })?;
            m = m.max(t.u + 1);
            n = n.max(t.v + 1);
            ratings.push(t);
        }
        Self::new(m, n, ratings)
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

    /// Number of observed triples.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.ratings.len()
    }

    /// Observed triples.
    #[inline]
    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    /// Mutable triples, for in-place reorder and scaling.
    #[inline]
    pub(crate) fn ratings_mut(&mut self) -> &mut [Rating] {
        &mut self.ratings
    }

    /// Population standard deviation of the rating values.
    ///
    /// Accumulated in f64; at large nnz a single-precision sum loses the
    /// small variance entirely.
    pub fn std_dev(&self) -> f32 {
        let nnz = self.nnz() as f64;
        let avg: f64 = self
            .ratings
            .par_iter()
            .map(|t| t.r as f64)
            .sum::<f64>()
            / nnz;
        let var: f64 = self
            .ratings
            .par_iter()
            .map(|t| {
                let d = t.r as f64 - avg;
                d * d
            })
            .sum::<f64>()
            / nnz;
        var.sqrt() as f32
    }

    /// Multiply every rating by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.ratings.par_iter_mut().for_each(|t| t.r *= factor);
    }

    /// Remap row indices through `p_map` and column indices through `q_map`.
    pub fn shuffle(&mut self, p_map: &[u32], q_map: &[u32]) {
        self.ratings.par_iter_mut().for_each(|t| {
            if (t.u as usize) < p_map.len() {
                t.u = p_map[t.u as usize];
            }
            if (t.v as usize) < q_map.len() {
                t.v = q_map[t.v as usize];
            }
        });
    }

    /// Per-row and per-column occurrence counts (omega), for the
    /// regularization report.
    pub fn occurrence_counts(&self) -> (Vec<u32>, Vec<u32>) {
        let mut omega_p = vec![0u32; self.m as usize];
        let mut omega_q = vec![0u32; self.n as usize];
        for t in &self.ratings {
            omega_p[t.u as usize] += 1;
            omega_q[t.v as usize] += 1;
        }
        (omega_p, omega_q)
    }

    /// Smallest rating value.
    pub fn min_rating(&self) -> f32 {
        self.ratings
            .par_iter()
            .map(|t| t.r)
            .reduce(|| f32::INFINITY, f32::min)
    }
}
