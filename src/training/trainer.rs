//! Training orchestration: shuffle, scale, partition, run epochs, restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::data::{GridPartition, Problem, Rating};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::rng::{invert_permutation, FactorRng};

use super::logger::TrainingLogger;
use super::params::TrainParams;
use super::scheduler::Scheduler;
use super::sgd::{run_worker, SgdContext, SharedTape};

/// Held-out loss of the cross-validation blocks after one training run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeldOutLoss {
    pub loss: f64,
    pub count: u64,
}

/// Trains a [`Model`] from a [`Problem`] with block-parallel SGD.
pub struct Trainer {
    params: TrainParams,
    logger: TrainingLogger,
}

impl Trainer {
    pub fn new(params: TrainParams) -> Self {
        let logger = TrainingLogger::from_quiet(params.quiet);
        Self { params, logger }
    }

    pub fn params(&self) -> &TrainParams {
        &self.params
    }

    /// Train on `tr`, optionally reporting RMSE on `va` each epoch.
    ///
    /// With `copy_data` set (the default) the inputs are cloned and the
    /// caller's problems are untouched. Otherwise training reorders and
    /// rescales the borrowed problems in place and restores them
    /// byte-identical before returning.
    pub fn train(&self, tr: &mut Problem, va: Option<&mut Problem>) -> Result<Model> {
        self.params.validate()?;
        if self.params.copy_data {
            let mut tr_copy = tr.clone();
            let mut va_copy = va.map(|v| v.clone());
            Ok(self.fpsg(&mut tr_copy, va_copy.as_mut(), &[])?.0)
        } else {
            Ok(self.fpsg(tr, va, &[])?.0)
        }
    }

    /// Train with the given blocks held out, reporting their loss.
    /// Always runs on a copy; used by cross-validation.
    pub(crate) fn train_held_out(
        &self,
        tr: &Problem,
        cv_blocks: &[u32],
    ) -> Result<(Model, HeldOutLoss)> {
        self.params.validate()?;
        let mut tr_copy = tr.clone();
        self.fpsg(&mut tr_copy, None, cv_blocks)
    }

    /// The solver core. `tr` (and `va` if present) arrive caller-indexed and
    /// unscaled, and leave the same way.
    fn fpsg(
        &self,
        tr: &mut Problem,
        mut va: Option<&mut Problem>,
        cv_blocks: &[u32],
    ) -> Result<(Model, HeldOutLoss)> {
        let params = &self.params;

        if params.do_nmf && params.do_implicit && tr.min_rating() < 0.0 {
            return Err(Error::Config(
                "nonnegative factors with implicit feedback require nonnegative ratings".into(),
            ));
        }

        let nr_bins = params.effective_bins();
        log::debug!(
            "training {}x{} nnz={} on a {}x{} grid with {} threads",
            tr.m(),
            tr.n(),
            tr.nnz(),
            nr_bins,
            nr_bins,
            params.nr_threads
        );

        // Borrowed inputs are restored from a snapshot at teardown: the grid
        // partition permutes the triple order and float scaling does not
        // round-trip bitwise, so an arithmetic undo cannot be byte-exact.
        let snapshot: Option<Vec<Rating>> = (!params.copy_data).then(|| tr.ratings().to_vec());
        let va_snapshot: Option<Vec<Rating>> = match (&va, params.copy_data) {
            (Some(va), false) => Some(va.ratings().to_vec()),
            _ => None,
        };

        let mut rng = FactorRng::seed_from_u64(params.seed);
        let jitter_rng = rng.split();

        let p_map = rng.permutation(tr.m() as usize);
        let q_map = rng.permutation(tr.n() as usize);
        tr.shuffle(&p_map, &q_map);
        if let Some(va) = va.as_deref_mut() {
            va.shuffle(&p_map, &q_map);
        }

        let grid = GridPartition::partition(tr, nr_bins);

        let mut model = Model::init(tr.m(), tr.n(), params.k, &mut rng)?;

        // Normalize the rating scale so one (eta, lambda) pair behaves the
        // same across datasets. A zero deviation (constant ratings, or a
        // single triple) leaves the scale alone.
        let std_dev = match tr.std_dev() {
            s if s > 0.0 => s,
            _ => 1.0,
        };
        tr.scale(1.0 / std_dev);
        if let Some(va) = va.as_deref_mut() {
            va.scale(1.0 / std_dev);
        }
        let lambda = params.lambda / std_dev;

        let sched = Scheduler::new(nr_bins, params.nr_threads, cv_blocks, jitter_rng);

        let (omega_p, omega_q) = tr.occurrence_counts();

        let mut pg = vec![1.0f32; tr.m() as usize * 2];
        let mut qg = vec![1.0f32; tr.n() as usize * 2];
        let slow_only = AtomicBool::new(true);

        let ctx = SgdContext {
            ratings: tr.ratings(),
            grid: &grid,
            tape: SharedTape::new(&mut model, &mut pg, &mut qg),
            eta: params.eta,
            lambda,
            alpha: params.alpha,
            do_nmf: params.do_nmf,
            do_implicit: params.do_implicit,
            slow_only: &slow_only,
        };

        let nnz = tr.nnz() as f64;
        let variance = (std_dev as f64) * (std_dev as f64);
        let va_view = va.as_deref();

        let run_result = thread::scope(|scope| -> Result<()> {
            for i in 0..params.nr_threads {
                let spawned = thread::Builder::new()
                    .name(format!("sgd-worker-{i}"))
                    .spawn_scoped(scope, || run_worker(&ctx, &sched));
                if let Err(e) = spawned {
                    // Already-running workers drain through the terminated
                    // check; scope join then completes.
                    sched.terminate();
                    return Err(Error::Internal(format!("spawning worker failed: {e}")));
                }
            }

            self.logger.epoch_header(va_view.is_some());
            for iter in 0..params.nr_iters {
                sched.wait_for_jobs_done();

                if self.logger.enabled() {
                    // SAFETY: all workers are parked; the scheduler mutex
                    // ordered their writes before these reads.
                    let reg = unsafe { calc_reg(&ctx.tape, &omega_p, &omega_q) }
                        * lambda as f64
                        * variance;
                    let tr_loss = sched.total_loss() * variance;
                    let tr_rmse = (tr_loss / nnz).sqrt();
                    let va_rmse = va_view.map(|va| {
                        // SAFETY: as above.
                        unsafe { calc_rmse(&ctx.tape, va) * std_dev as f64 }
                    });
                    self.logger.epoch_row(iter, tr_rmse, va_rmse, reg + tr_loss);
                }

                if iter == 0 {
                    // Warm-up done: the accumulators now carry enough mass
                    // for the fast lane's adaptive scale.
                    slow_only.store(false, Ordering::Relaxed);
                }
                if iter + 1 < params.nr_iters {
                    sched.resume();
                }
            }
            // Terminate at the quiescence point, with every worker parked.
            // Authorizing another epoch first would let workers race the
            // terminated flag and run a timing-dependent number of extra
            // updates, breaking fixed-seed reproducibility.
            sched.terminate();
            Ok(())
        });

        let (final_loss, held_out) = if run_result.is_ok() {
            // SAFETY: every worker has exited; this thread is the only
            // accessor of the shared storage from here on.
            let final_loss = unsafe { calc_loss(&ctx.tape, tr.ratings()) } * variance;
            let mut held_out = HeldOutLoss::default();
            for &b in cv_blocks {
                let range = grid.block_range(b as usize);
                held_out.count += range.len() as u64;
                // SAFETY: as above.
                held_out.loss += unsafe { calc_loss(&ctx.tape, &tr.ratings()[range]) };
            }
            held_out.loss *= variance;
            (final_loss, held_out)
        } else {
            (0.0, HeldOutLoss::default())
        };

        drop(ctx);

        // Borrowed problems are restored even when a worker failed to spawn.
        if let Some(snapshot) = snapshot {
            tr.ratings_mut().copy_from_slice(&snapshot);
        }
        if let (Some(va), Some(snap)) = (va.as_deref_mut(), va_snapshot) {
            va.ratings_mut().copy_from_slice(&snap);
        }
        run_result?;

        self.logger.final_rmse((final_loss / nnz).sqrt());

        let inv_p_map = invert_permutation(&p_map);
        let inv_q_map = invert_permutation(&q_map);

        model.scale_factors(std_dev.sqrt());
        model.shrink(params.k);
        model.permute_rows(&inv_p_map, &inv_q_map);

        Ok((model, held_out))
    }
}

/// `sum_u omega_p[u] * |P[u]|^2 + sum_v omega_q[v] * |Q[v]|^2`, for the
/// objective report.
///
/// # Safety
/// Must only be called while every worker is parked or exited.
unsafe fn calc_reg(tape: &SharedTape, omega_p: &[u32], omega_q: &[u32]) -> f64 {
    let mut reg = 0.0f64;
    for (u, &w) in omega_p.iter().enumerate() {
        let row = tape.p_row(u as u32);
        reg += w as f64 * crate::model::dot(row, row) as f64;
    }
    for (v, &w) in omega_q.iter().enumerate() {
        let row = tape.q_row(v as u32);
        reg += w as f64 * crate::model::dot(row, row) as f64;
    }
    reg
}

/// Squared-error sum of the current factors over `ratings`.
///
/// # Safety
/// Must only be called while every worker is parked or exited.
unsafe fn calc_loss(tape: &SharedTape, ratings: &[Rating]) -> f64 {
    let mut loss = 0.0f64;
    for t in ratings {
        let e = t.r as f64 - tape.predict(t.u, t.v) as f64;
        loss += e * e;
    }
    loss
}

/// RMSE of the current factors over a problem's ratings.
///
/// # Safety
/// Must only be called while every worker is parked or exited.
unsafe fn calc_rmse(tape: &SharedTape, prob: &Problem) -> f64 {
    if prob.nnz() == 0 {
        return 0.0;
    }
    (calc_loss(tape, prob.ratings()) / prob.nnz() as f64).sqrt()
}
