//! Block partition of a problem over a B x B grid.
//!
//! Assigns every triple to one of `B*B` blocks and reorders the triple array
//! in place so each block occupies a contiguous range. Two blocks touch
//! disjoint row stripes of P iff their p-coordinates differ, and disjoint
//! column stripes of Q iff their q-coordinates differ; the scheduler's
//! non-conflict rule is built on exactly this property.

use rayon::prelude::*;

use super::problem::Problem;

/// A completed partition: block ranges over the problem's triple array.
#[derive(Debug)]
pub struct GridPartition {
    nr_bins: u32,
    seg_p: u32,
    seg_q: u32,
    /// `ptrs[b]..ptrs[b+1]` is block `b`'s range; length `B*B + 1`.
    ptrs: Vec<usize>,
}

impl GridPartition {
    /// Partition `prob` into `nr_bins * nr_bins` contiguous blocks.
    ///
    /// The reorder runs as `B*B` pivots cyclically swapping triples into
    /// their home ranges, then each block is sorted for cache locality in
    /// the SGD kernel: by (u, v) when m > n, else by (v, u).
    pub fn partition(prob: &mut Problem, nr_bins: u32) -> Self {
        let nr_blocks = (nr_bins * nr_bins) as usize;
        let seg_p = prob.m().div_ceil(nr_bins);
        let seg_q = prob.n().div_ceil(nr_bins);
        let block_of = |u: u32, v: u32| ((u / seg_p) * nr_bins + v / seg_q) as usize;

        let mut counts = vec![0usize; nr_blocks];
        for t in prob.ratings() {
            counts[block_of(t.u, t.v)] += 1;
        }

        let mut ptrs = vec![0usize; nr_blocks + 1];
        for b in 0..nr_blocks {
            ptrs[b + 1] = ptrs[b] + counts[b];
        }

        // Cyclic in-place swap: each pivot advances over its block's range,
        // ejecting foreign triples to their home pivot.
        let ratings = prob.ratings_mut();
        let mut pivots: Vec<usize> = ptrs[..nr_blocks].to_vec();
        for b in 0..nr_blocks {
            while pivots[b] != ptrs[b + 1] {
                let i = pivots[b];
                let home = block_of(ratings[i].u, ratings[i].v);
                if home == b {
                    pivots[b] += 1;
                } else {
                    ratings.swap(i, pivots[home]);
                    pivots[home] += 1;
                }
            }
        }

        // Per-block sort, parallel across blocks (ranges are disjoint).
        let by_u = prob.m() > prob.n();
        let mut blocks: Vec<&mut [super::problem::Rating]> = Vec::with_capacity(nr_blocks);
        let mut rest = prob.ratings_mut();
        for b in 0..nr_blocks {
            let len = ptrs[b + 1] - ptrs[b];
            let (head, tail) = rest.split_at_mut(len);
            blocks.push(head);
            rest = tail;
        }
        blocks.into_par_iter().for_each(|block| {
            if by_u {
                block.sort_unstable_by_key(|t| (t.u, t.v));
            } else {
                block.sort_unstable_by_key(|t| (t.v, t.u));
            }
        });

        Self {
            nr_bins,
            seg_p,
            seg_q,
            ptrs,
        }
    }

    /// Grid side length B.
    #[inline]
    pub fn nr_bins(&self) -> u32 {
        self.nr_bins
    }

    /// Total number of blocks, `B*B`.
    #[inline]
    pub fn nr_blocks(&self) -> usize {
        (self.nr_bins * self.nr_bins) as usize
    }

    /// Block index owning position `(u, v)`.
    #[inline]
    pub fn block_of(&self, u: u32, v: u32) -> usize {
        ((u / self.seg_p) * self.nr_bins + v / self.seg_q) as usize
    }

    /// Triple range of block `b`.
    #[inline]
    pub fn block_range(&self, b: usize) -> std::ops::Range<usize> {
        self.ptrs[b]..self.ptrs[b + 1]
    }

    /// Number of triples in block `b`.
    #[inline]
    pub fn block_len(&self, b: usize) -> usize {
        self.ptrs[b + 1] - self.ptrs[b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::problem::Rating;
    use crate::rng::FactorRng;

    fn random_problem(m: u32, n: u32, nnz: usize, seed: u64) -> Problem {
        let mut rng = FactorRng::seed_from_u64(seed);
        let ratings = (0..nnz)
            .map(|_| Rating {
                u: (rng.next_f32() * m as f32) as u32 % m,
                v: (rng.next_f32() * n as f32) as u32 % n,
                r: rng.next_f32() * 5.0,
            })
            .collect();
        Problem::new(m, n, ratings).unwrap()
    }

    #[test]
    fn test_blocks_are_grouped_and_cover_all() {
        let mut prob = random_problem(100, 80, 5000, 42);
        let before: usize = prob.nnz();
        let grid = GridPartition::partition(&mut prob, 4);

        let mut total = 0;
        for b in 0..grid.nr_blocks() {
            let range = grid.block_range(b);
            total += range.len();
            for t in &prob.ratings()[range] {
                assert_eq!(grid.block_of(t.u, t.v), b);
            }
        }
        assert_eq!(total, before);
    }

    #[test]
    fn test_partition_preserves_multiset() {
        let mut prob = random_problem(30, 30, 500, 7);
        let mut before: Vec<(u32, u32, u32)> = prob
            .ratings()
            .iter()
            .map(|t| (t.u, t.v, t.r.to_bits()))
            .collect();
        GridPartition::partition(&mut prob, 3);
        let mut after: Vec<(u32, u32, u32)> = prob
            .ratings()
            .iter()
            .map(|t| (t.u, t.v, t.r.to_bits()))
            .collect();
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_blocks_sorted_for_locality() {
        // n > m, so blocks sort by (v, u).
        let mut prob = random_problem(20, 50, 1000, 3);
        let grid = GridPartition::partition(&mut prob, 2);
        for b in 0..grid.nr_blocks() {
            let block = &prob.ratings()[grid.block_range(b)];
            for w in block.windows(2) {
                assert!((w[0].v, w[0].u) <= (w[1].v, w[1].u));
            }
        }
    }

    #[test]
    fn test_disjoint_stripes() {
        let mut prob = random_problem(64, 64, 2000, 9);
        let grid = GridPartition::partition(&mut prob, 4);
        // Two blocks in different grid rows and columns must touch disjoint
        // u-ranges and v-ranges.
        let collect = |b: usize| {
            let us: Vec<u32> = prob.ratings()[grid.block_range(b)]
                .iter()
                .map(|t| t.u)
                .collect();
            let vs: Vec<u32> = prob.ratings()[grid.block_range(b)]
                .iter()
                .map(|t| t.v)
                .collect();
            (us, vs)
        };
        let (u0, v0) = collect(0); // block (0, 0)
        let (u5, v5) = collect(5); // block (1, 1)
        for u in &u0 {
            assert!(!u5.contains(u));
        }
        for v in &v0 {
            assert!(!v5.contains(v));
        }
    }

    #[test]
    fn test_single_bin() {
        let mut prob = random_problem(10, 10, 100, 1);
        let grid = GridPartition::partition(&mut prob, 1);
        assert_eq!(grid.nr_blocks(), 1);
        assert_eq!(grid.block_range(0), 0..100);
    }
}
