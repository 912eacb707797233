//! K-fold cross-validation over held-out grid blocks.
//!
//! Folds hold out whole blocks of the training grid rather than individual
//! triples: the block list is shuffled once, split into roughly equal
//! slices, and each slice is excluded from one training run.

use crate::data::Problem;
use crate::error::{Error, Result};
use crate::rng::FactorRng;

use super::logger::TrainingLogger;
use super::params::TrainParams;
use super::trainer::Trainer;

/// Outcome of one cross-validation run.
#[derive(Debug, Clone)]
pub struct CvResult {
    /// RMSE of each fold, in fold order.
    pub fold_rmse: Vec<f64>,
    /// RMSE pooled over every held-out triple.
    pub rmse: f64,
}

/// Cross-validate `params` on `prob` with `nr_folds` folds.
pub fn cross_validate(prob: &Problem, nr_folds: u32, params: &TrainParams) -> Result<CvResult> {
    params.validate()?;
    if nr_folds < 2 {
        return Err(Error::invalid("nr_folds must be at least 2"));
    }

    let logger = TrainingLogger::from_quiet(params.quiet);

    // Inner runs stay quiet; this function prints the fold table itself.
    let mut inner = params.clone();
    inner.quiet = true;
    let trainer = Trainer::new(inner);

    let nr_bins = params.effective_bins();
    let nr_blocks = nr_bins * nr_bins;
    let blocks_per_fold = (nr_blocks / nr_folds).max(1);

    // The fold split gets its own stream so it does not disturb the factor
    // initialization sequence inside each run.
    let mut rng = FactorRng::seed_from_u64(params.seed).split();
    let blocks: Vec<u32> = rng.permutation(nr_blocks as usize);

    logger.fold_header();

    let mut total_loss = 0.0f64;
    let mut total_count = 0u64;
    let mut fold_rmse = Vec::with_capacity(nr_folds as usize);
    for fold in 0..nr_folds {
        let begin = ((fold * blocks_per_fold) as usize).min(nr_blocks as usize);
        let end = if fold == nr_folds - 1 {
            nr_blocks as usize
        } else {
            (((fold + 1) * blocks_per_fold) as usize).min(nr_blocks as usize)
        };
        let cv_blocks = &blocks[begin..end];

        let (_, held_out) = trainer.train_held_out(prob, cv_blocks)?;
        let rmse = if held_out.count > 0 {
            (held_out.loss / held_out.count as f64).sqrt()
        } else {
            0.0
        };
        logger.fold_row(fold, rmse);

        total_loss += held_out.loss;
        total_count += held_out.count;
        fold_rmse.push(rmse);
    }

    if total_count == 0 {
        return Err(Error::invalid("no triples fell into held-out blocks"));
    }
    let rmse = (total_loss / total_count as f64).sqrt();
    logger.fold_summary(rmse);

    Ok(CvResult { fold_rmse, rmse })
}
