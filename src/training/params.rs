//! Training parameters.

use crate::error::{Error, Result};

/// Parameters for the parallel SGD solver.
#[derive(Debug, Clone)]
pub struct TrainParams {
    /// Number of latent factors.
    pub k: usize,
    /// Worker thread count.
    pub nr_threads: u32,
    /// Grid side length B. Raised to `2 * nr_threads` when smaller, so the
    /// scheduler can always find a non-conflicting block.
    pub nr_bins: u32,
    /// Number of epochs.
    pub nr_iters: u32,
    /// L2 regularization strength.
    pub lambda: f32,
    /// Base learning rate.
    pub eta: f32,
    /// Implicit-feedback confidence scale.
    pub alpha: f32,
    /// Constrain factors to be nonnegative.
    pub do_nmf: bool,
    /// Treat ratings as confidence weights on a preference indicator
    /// instead of regression targets.
    pub do_implicit: bool,
    /// Suppress the per-epoch report.
    pub quiet: bool,
    /// Train on a private copy of the input. When false the input is
    /// reordered and rescaled in place during training and restored
    /// byte-identical afterwards.
    pub copy_data: bool,
    /// Seed for factor initialization, permutations, and scheduler jitter.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            k: 8,
            nr_threads: 1,
            nr_bins: 20,
            nr_iters: 20,
            lambda: 0.1,
            eta: 0.1,
            alpha: 40.0,
            do_nmf: false,
            do_implicit: false,
            quiet: false,
            copy_data: true,
            seed: 0,
        }
    }
}

impl TrainParams {
    /// Check parameter ranges before any allocation or thread spawn.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::invalid("k must be positive"));
        }
        if self.nr_threads == 0 {
            return Err(Error::invalid("nr_threads must be positive"));
        }
        if self.nr_bins == 0 {
            return Err(Error::invalid("nr_bins must be positive"));
        }
        if self.nr_iters == 0 {
            return Err(Error::invalid("nr_iters must be positive"));
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(Error::invalid("lambda must be finite and nonnegative"));
        }
        if !(self.eta.is_finite() && self.eta > 0.0) {
            return Err(Error::invalid("eta must be finite and positive"));
        }
        Ok(())
    }

    /// Effective grid side: at least `2 * nr_threads`.
    pub(crate) fn effective_bins(&self) -> u32 {
        self.nr_bins.max(2 * self.nr_threads)
    }
}
