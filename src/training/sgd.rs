//! The per-worker SGD loop and its per-triple update step.
//!
//! Each worker repeatedly claims a block from the scheduler, runs one
//! stochastic step per triple in the block, and returns the block with its
//! accumulated loss. Factor updates use adaptive per-row learning rates with
//! the dimensions split into a slow lane (the first [`LANES`] dims) and a
//! fast lane (the rest), each with its own squared-gradient accumulator.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::{AlignedBuffer, GridPartition, Rating, LANES};
use crate::model::{dot, Model};

use super::scheduler::Scheduler;

/// Raw views into the shared factor storage.
///
/// Workers write P, Q and the adaptive accumulators through these pointers
/// without locks. Soundness rests on the scheduler's non-conflict invariant:
/// no two in-flight blocks share a row stripe or a column stripe, so no two
/// workers ever touch the same row of any of the four arrays.
pub(crate) struct SharedTape {
    p: *mut f32,
    q: *mut f32,
    pg: *mut f32,
    qg: *mut f32,
    k: usize,
    m: u32,
    n: u32,
}

// SAFETY: all access is row-disjoint across threads per the scheduler's
// non-conflict invariant; reads from the orchestrator happen only at epoch
// quiescence points, which are separated from worker writes by the scheduler
// mutex.
unsafe impl Send for SharedTape {}
unsafe impl Sync for SharedTape {}

impl SharedTape {
    pub(crate) fn new(model: &mut Model, pg: &mut [f32], qg: &mut [f32]) -> Self {
        let k = model.k();
        let (m, n) = (model.m(), model.n());
        let (p, q): (&mut AlignedBuffer, &mut AlignedBuffer) = model.factors_mut();
        Self {
            p: p.as_ptr(),
            q: q.as_ptr(),
            pg: pg.as_mut_ptr(),
            qg: qg.as_mut_ptr(),
            k,
            m,
            n,
        }
    }

    /// Factor row of user `u`.
    ///
    /// # Safety
    /// The caller must hold scheduling rights to `u`'s row stripe (worker),
    /// or be at an epoch quiescence point (orchestrator).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn p_row(&self, u: u32) -> &mut [f32] {
        std::slice::from_raw_parts_mut(self.p.add(u as usize * self.k), self.k)
    }

    /// Factor row of item `v`. Same contract as [`SharedTape::p_row`].
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn q_row(&self, v: u32) -> &mut [f32] {
        std::slice::from_raw_parts_mut(self.q.add(v as usize * self.k), self.k)
    }

    /// Slow/fast accumulator pair of user `u`. Same contract as
    /// [`SharedTape::p_row`].
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn pg_pair(&self, u: u32) -> &mut [f32] {
        std::slice::from_raw_parts_mut(self.pg.add(u as usize * 2), 2)
    }

    /// Slow/fast accumulator pair of item `v`. Same contract as
    /// [`SharedTape::p_row`].
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn qg_pair(&self, v: u32) -> &mut [f32] {
        std::slice::from_raw_parts_mut(self.qg.add(v as usize * 2), 2)
    }

    /// Prediction with the current factors; out-of-range indices give 0.
    ///
    /// # Safety
    /// Only valid at an epoch quiescence point.
    pub(crate) unsafe fn predict(&self, u: u32, v: u32) -> f32 {
        if u >= self.m || v >= self.n {
            return 0.0;
        }
        dot(self.p_row(u), self.q_row(v))
    }
}

/// Kernel parameters fixed for one training invocation.
pub(crate) struct SgdContext<'a> {
    pub ratings: &'a [Rating],
    pub grid: &'a GridPartition,
    pub tape: SharedTape,
    pub eta: f32,
    /// Already divided by the rating standard deviation.
    pub lambda: f32,
    pub alpha: f32,
    pub do_nmf: bool,
    pub do_implicit: bool,
    /// True during the warm-up epoch; only the slow lane moves until the
    /// accumulators have gathered some gradient mass.
    pub slow_only: &'a AtomicBool,
}

/// Fast inverse square root (0x5f375a86 variant, one Newton step).
///
/// Accuracy within ~0.2% of `1/sqrt(x)`, plenty for a learning-rate scale.
#[inline]
fn rsqrt(x: f32) -> f32 {
    let half = 0.5 * x;
    let mut y = f32::from_bits(0x5f37_5a86u32.wrapping_sub(x.to_bits() >> 1));
    y *= 1.5 - half * y * y;
    y
}

/// One adaptive gradient step over `dims` of a factor row pair.
///
/// Returns nothing; the lane accumulators advance by the mean squared
/// gradient over the lane so the two lanes stay comparable regardless of
/// their widths.
#[allow(clippy::too_many_arguments)]
#[inline]
fn sg_update(
    p: &mut [f32],
    q: &mut [f32],
    pg: &mut f32,
    qg: &mut f32,
    dims: std::ops::Range<usize>,
    eta: f32,
    lambda: f32,
    error: f32,
    rk: f32,
    do_nmf: bool,
) {
    let eta_p = eta * rsqrt(*pg);
    let eta_q = eta * rsqrt(*qg);

    let mut pg1 = 0.0f32;
    let mut qg1 = 0.0f32;

    for d in dims {
        let gp = -error * q[d] + lambda * p[d];
        let gq = -error * p[d] + lambda * q[d];

        pg1 += gp * gp;
        qg1 += gq * gq;

        p[d] -= eta_p * gp;
        q[d] -= eta_q * gq;

        if do_nmf {
            p[d] = p[d].max(0.0);
            q[d] = q[d].max(0.0);
        }
    }

    *pg += pg1 * rk;
    *qg += qg1 * rk;
}

/// Worker entry point: claim blocks until terminated.
pub(crate) fn run_worker(ctx: &SgdContext<'_>, sched: &Scheduler) {
    let k = ctx.tape.k;
    let slow_dims = LANES.min(k);
    let rk_slow = 1.0 / slow_dims as f32;
    // Degenerate k: no fast lane at all, the slow lane is the whole row.
    let has_fast = k > LANES;
    let rk_fast = if has_fast {
        1.0 / (k - LANES) as f32
    } else {
        0.0
    };

    loop {
        let block = sched.get_job();
        let mut loss = 0.0f64;
        let slow_only = ctx.slow_only.load(Ordering::Relaxed);

        for t in &ctx.ratings[ctx.grid.block_range(block)] {
            // SAFETY: the scheduler handed this worker block `block`, which
            // grants exclusive access to its row and column stripes.
            let p = unsafe { ctx.tape.p_row(t.u) };
            let q = unsafe { ctx.tape.q_row(t.v) };
            let pg = unsafe { ctx.tape.pg_pair(t.u) };
            let qg = unsafe { ctx.tape.qg_pair(t.v) };

            let z = dot(p, q);
            let (mut error, weight) = if ctx.do_implicit {
                let pref = if t.r > 0.0 { 1.0f32 } else { 0.0 };
                // Confidence clamped at zero; a strongly negative rating in
                // implicit mode must not flip the gradient sign.
                let w = (1.0 + ctx.alpha * t.r).max(0.0);
                (pref - z, w)
            } else {
                (t.r - z, 1.0)
            };

            loss += (weight * error * error) as f64;
            if ctx.do_implicit {
                error *= weight;
            }

            sg_update(
                p,
                q,
                &mut pg[0],
                &mut qg[0],
                0..slow_dims,
                ctx.eta,
                ctx.lambda,
                error,
                rk_slow,
                ctx.do_nmf,
            );

            if slow_only || !has_fast {
                continue;
            }

            sg_update(
                p,
                q,
                &mut pg[1],
                &mut qg[1],
                LANES..k,
                ctx.eta,
                ctx.lambda,
                error,
                rk_fast,
                ctx.do_nmf,
            );
        }

        sched.put_job(block, loss);
        if sched.is_terminated() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsqrt_accuracy() {
        for &x in &[0.25f32, 0.5, 1.0, 2.0, 10.0, 1234.5] {
            let approx = rsqrt(x);
            let exact = 1.0 / x.sqrt();
            let rel = ((approx - exact) / exact).abs();
            assert!(rel < 2e-3, "rsqrt({x}) off by {rel}");
        }
    }

    #[test]
    fn test_sg_update_reduces_error() {
        let mut p = vec![0.1f32; 4];
        let mut q = vec![0.1f32; 4];
        let (mut pg, mut qg) = (1.0f32, 1.0f32);
        let target = 1.0f32;

        for _ in 0..200 {
            let z = dot(&p, &q);
            let error = target - z;
            sg_update(
                &mut p, &mut q, &mut pg, &mut qg, 0..4, 0.1, 0.01, error, 0.25, false,
            );
        }
        let z = dot(&p, &q);
        assert!((target - z).abs() < 0.05, "converged to {z}");
    }

    #[test]
    fn test_sg_update_nmf_clamps() {
        let mut p = vec![0.5f32; 4];
        let mut q = vec![0.5f32; 4];
        let (mut pg, mut qg) = (1.0f32, 1.0f32);

        // A large negative error drives factors downward; the clamp must
        // keep them at zero.
        for _ in 0..50 {
            let z = dot(&p, &q);
            let error = -5.0 - z;
            sg_update(
                &mut p, &mut q, &mut pg, &mut qg, 0..4, 0.1, 0.0, error, 0.25, true,
            );
        }
        assert!(p.iter().all(|&x| x >= 0.0));
        assert!(q.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_accumulators_monotone() {
        let mut p = vec![0.3f32; 4];
        let mut q = vec![0.7f32; 4];
        let (mut pg, mut qg) = (1.0f32, 1.0f32);
        let mut last_pg = pg;
        let mut last_qg = qg;

        for step in 0..100 {
            let z = dot(&p, &q);
            let error = ((step % 7) as f32 - 3.0) - z;
            sg_update(
                &mut p, &mut q, &mut pg, &mut qg, 0..4, 0.05, 0.02, error, 0.25, false,
            );
            assert!(pg >= last_pg);
            assert!(qg >= last_qg);
            last_pg = pg;
            last_qg = qg;
        }
    }
}
